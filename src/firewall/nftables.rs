//! nftables backend
//!
//! Drives the `nft` CLI against a dedicated table/chain. Rules are
//! added with `--echo --handle` so the kernel-assigned handle is
//! captured at insert time; removal is by that exact handle, never by
//! scanning rule text.

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::process::Command;

use tracing::{debug, info};

use super::{FirewallAdmin, FirewallError, RuleHandle};

const TABLE: &str = "ngfw_congo";
const CHAIN: &str = "block_chain";

/// FirewallAdmin speaking the nftables dialect.
pub struct NftablesAdmin {
    nft_path: String,
}

impl NftablesAdmin {
    pub fn new() -> Self {
        Self {
            nft_path: "nft".to_string(),
        }
    }

    /// Use a specific nft binary (tests, containers).
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            nft_path: path.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, FirewallError> {
        let output = Command::new(&self.nft_path)
            .args(args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    FirewallError::Permanent(format!("'{}' binary not found", self.nft_path))
                }
                ErrorKind::PermissionDenied => {
                    FirewallError::Permanent(format!("'{}' not executable", self.nft_path))
                }
                _ => FirewallError::Transient(format!("failed to spawn nft: {}", e)),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify(&stderr))
    }
}

impl Default for NftablesAdmin {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallAdmin for NftablesAdmin {
    fn ensure_chain(&self) -> Result<(), FirewallError> {
        // "add" is idempotent for tables and chains
        self.run(&["add", "table", "ip", TABLE])?;
        self.run(&[
            "add",
            "chain",
            "ip",
            TABLE,
            CHAIN,
            "{ type filter hook input priority 0; policy accept; }",
        ])?;

        info!("nftables table '{}' chain '{}' ready", TABLE, CHAIN);
        Ok(())
    }

    fn add_drop(&self, addr: Ipv4Addr) -> Result<RuleHandle, FirewallError> {
        let addr_str = addr.to_string();
        let output = self.run(&[
            "--echo",
            "--handle",
            "add",
            "rule",
            "ip",
            TABLE,
            CHAIN,
            "ip",
            "saddr",
            &addr_str,
            "counter",
            "drop",
        ])?;

        let handle = parse_echoed_handle(&output).ok_or_else(|| {
            FirewallError::Transient(format!("no handle in nft output: {:?}", output))
        })?;

        debug!("Installed drop rule for {} (handle {})", addr, handle);
        Ok(handle)
    }

    fn remove(&self, handle: &RuleHandle) -> Result<(), FirewallError> {
        self.run(&[
            "delete",
            "rule",
            "ip",
            TABLE,
            CHAIN,
            "handle",
            handle.as_str(),
        ])?;

        debug!("Removed rule handle {}", handle);
        Ok(())
    }

    fn existing_drops(&self) -> Result<Vec<(Ipv4Addr, RuleHandle)>, FirewallError> {
        let listing = match self.run(&["-a", "list", "chain", "ip", TABLE, CHAIN]) {
            Ok(out) => out,
            // Fresh host: nothing to recover
            Err(FirewallError::Transient(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(parse_chain_listing(&listing))
    }
}

/// Classify nft stderr into retryable vs. fatal.
fn classify(stderr: &str) -> FirewallError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("operation not permitted") || lowered.contains("permission denied") {
        FirewallError::Permanent(stderr.to_string())
    } else {
        // Missing table/chain, busy netlink socket, syntax drift: the
        // caller may re-ensure the chain and retry.
        FirewallError::Transient(stderr.to_string())
    }
}

/// Pull `# handle N` out of echoed nft output.
fn parse_echoed_handle(output: &str) -> Option<RuleHandle> {
    for line in output.lines() {
        if let Some(handle) = parse_handle_comment(line) {
            if line.contains("saddr") && line.contains("drop") {
                return Some(handle);
            }
        }
    }
    None
}

/// Parse `-a list chain` output into (address, handle) pairs.
fn parse_chain_listing(listing: &str) -> Vec<(Ipv4Addr, RuleHandle)> {
    let mut drops = Vec::new();

    for line in listing.lines() {
        let line = line.trim();
        if !line.contains("drop") {
            continue;
        }

        let addr = line
            .split_whitespace()
            .skip_while(|tok| *tok != "saddr")
            .nth(1)
            .and_then(|tok| tok.parse::<Ipv4Addr>().ok());

        if let (Some(addr), Some(handle)) = (addr, parse_handle_comment(line)) {
            drops.push((addr, handle));
        }
    }

    drops
}

fn parse_handle_comment(line: &str) -> Option<RuleHandle> {
    let (_, after) = line.split_once("# handle ")?;
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(RuleHandle::new(digits))
    }
}
