//! Workload request validation.
//!
//! Everything here runs before a session row, a job, or a token exists, so
//! a rejection has no cleanup to do. The checks are deliberately strict:
//! the `code_url` host must be on the configured allowlist and must not be
//! an address the sandbox could use to reach cluster-internal surfaces, and
//! the `command` must not carry shell substitution syntax even though no
//! control-plane shell ever expands it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};
use wscli_types::api::v1::CreateSessionRequest;

/// Max length of `code_url` in characters.
pub const MAX_CODE_URL_CHARS: usize = 2048;
/// Max length of `command` in characters.
pub const MAX_COMMAND_CHARS: usize = 1000;
/// Max length of `prompt` in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Substitution syntax that must never appear in a sandbox command.
const FORBIDDEN_COMMAND_PATTERNS: [&str; 5] = ["$(", "`", "${", "<(", ">("];

/// A rejected request with its machine-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AdmissionReject(
    /// The reason, e.g. `"command too long"`.
    pub String,
);

impl AdmissionReject {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Validates a create-session request against the configured code-domain
/// allowlist.
pub fn validate_request(
    request: &CreateSessionRequest,
    allowed_code_domains: &[String],
) -> Result<(), AdmissionReject> {
    validate_code_url(&request.code_url, allowed_code_domains)?;
    if let Some(checksum) = &request.code_checksum {
        validate_checksum(checksum)?;
    }
    if let Some(command) = &request.command {
        validate_command(command)?;
    }
    if let Some(prompt) = &request.prompt
        && prompt.chars().count() > MAX_PROMPT_CHARS
    {
        return Err(AdmissionReject::new("prompt too long"));
    }
    Ok(())
}

fn validate_code_url(raw: &str, allowed_code_domains: &[String]) -> Result<(), AdmissionReject> {
    if raw.chars().count() > MAX_CODE_URL_CHARS {
        return Err(AdmissionReject::new("code url too long"));
    }
    let url = Url::parse(raw).map_err(|_| AdmissionReject::new("code url is not a valid url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AdmissionReject::new("code url must use http or https"));
    }
    match url.host() {
        None => Err(AdmissionReject::new("code url has no host")),
        Some(Host::Ipv4(ip)) => reject_forbidden_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => reject_forbidden_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            // domains sometimes smuggle an address literal past Host
            if let Ok(ip) = domain.parse::<IpAddr>() {
                reject_forbidden_ip(ip)?;
            }
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(AdmissionReject::new("code url host is forbidden"));
            }
            if !domain_allowed(&domain, allowed_code_domains) {
                return Err(AdmissionReject::new("code url host is not allowed"));
            }
            Ok(())
        }
    }
}

fn domain_allowed(domain: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        match entry.strip_prefix("*.") {
            Some(suffix) => {
                domain == suffix || domain.ends_with(&format!(".{suffix}"))
            }
            None => domain == entry,
        }
    })
}

fn reject_forbidden_ip(ip: IpAddr) -> Result<(), AdmissionReject> {
    if is_forbidden_ip(ip) {
        Err(AdmissionReject::new("code url resolves to a forbidden address"))
    } else {
        // an allowed plain address would still have to be on the domain
        // allowlist, which only carries hostnames
        Err(AdmissionReject::new("code url host is not allowed"))
    }
}

fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_forbidden_v4(mapped);
            }
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // unique-local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // link-local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn validate_checksum(checksum: &str) -> Result<(), AdmissionReject> {
    let well_formed = checksum.len() == 64 && checksum.bytes().all(|b| b.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(AdmissionReject::new("code checksum is not a sha-256 hex digest"))
    }
}

fn validate_command(command: &str) -> Result<(), AdmissionReject> {
    if command.chars().count() > MAX_COMMAND_CHARS {
        return Err(AdmissionReject::new("command too long"));
    }
    if FORBIDDEN_COMMAND_PATTERNS
        .iter()
        .any(|pattern| command.contains(pattern))
    {
        return Err(AdmissionReject::new("command contains substitution syntax"));
    }
    Ok(())
}
