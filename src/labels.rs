//! Decoding of workload labels into a registration spec.
//!
//! Labels are free-form strings set by whoever deployed the container.
//! Anything that cannot be parsed is reported as a [`LabelError`] so the
//! caller skips the workload instead of publishing a half-correct entry.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::types::PortBinding;

pub const PORTS: &str = "annotation.io.kubernetes.container.ports";
pub const CONTAINER_NAME: &str = "io.rancher.container.name";
pub const ENABLE: &str = "herder.service.enable";
pub const SERVICE_NAME: &str = "herder.service.name";
pub const SERVICE_TAGS: &str = "herder.service.tags";
pub const CHECK_PATH: &str = "herder.service.check.http.path";
pub const CHECK_PORT: &str = "herder.service.check.http.port";
pub const CHECK_SCHEME: &str = "herder.service.check.http.schema";
pub const CHECK_INTERVAL: &str = "herder.service.check.interval";
pub const CHECK_TCP: &str = "herder.service.check.tcp";

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_CHECK_SCHEME: &str = "http";

/// How a missing or unreadable enable label is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityPolicy {
    /// Absent label means eligible.
    Permissive,
    /// Only an explicit true value is eligible.
    Strict,
}

impl EligibilityPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            EligibilityPolicy::Strict
        } else {
            EligibilityPolicy::Permissive
        }
    }
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("malformed port bindings label: {0}")]
    Ports(#[from] serde_json::Error),
    #[error("label `{label}` is not a boolean: {value:?}")]
    Bool { label: &'static str, value: String },
    #[error("label `{label}` is not a port number: {value:?}")]
    Number { label: &'static str, value: String },
    #[error("label `{label}` is not an interval: {value:?}")]
    Interval { label: &'static str, value: String },
}

/// Everything the labels say about how a workload should be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSpec {
    pub service_name: Option<String>,
    pub tags: Vec<String>,
    pub check_path: Option<String>,
    pub check_scheme: String,
    pub check_tcp: bool,
    pub check_interval: Duration,
    pub check_port: Option<u16>,
    pub eligible: bool,
    pub ports: Vec<PortBinding>,
}

/// Decode a label map.
///
/// `Ok(None)` means the workload exposes no ports and there is nothing to
/// register.
pub fn decode(
    labels: &HashMap<String, String>,
    policy: EligibilityPolicy,
) -> Result<Option<RegistrationSpec>, LabelError> {
    let ports = match non_empty(labels, PORTS) {
        Some(raw) => serde_json::from_str::<Vec<PortBinding>>(raw)?,
        None => return Ok(None),
    };
    if ports.is_empty() {
        return Ok(None);
    }

    let check_tcp = match non_empty(labels, CHECK_TCP) {
        Some(raw) => parse_bool(raw).ok_or_else(|| LabelError::Bool {
            label: CHECK_TCP,
            value: raw.to_string(),
        })?,
        None => false,
    };

    let check_port = match non_empty(labels, CHECK_PORT) {
        Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| LabelError::Number {
            label: CHECK_PORT,
            value: raw.to_string(),
        })?),
        None => None,
    };

    let check_interval = match non_empty(labels, CHECK_INTERVAL) {
        Some(raw) => parse_interval(raw).ok_or_else(|| LabelError::Interval {
            label: CHECK_INTERVAL,
            value: raw.to_string(),
        })?,
        None => DEFAULT_CHECK_INTERVAL,
    };

    Ok(Some(RegistrationSpec {
        service_name: non_empty(labels, SERVICE_NAME)
            .or_else(|| non_empty(labels, CONTAINER_NAME))
            .map(str::to_string),
        tags: non_empty(labels, SERVICE_TAGS)
            .map(parse_tags)
            .unwrap_or_default(),
        check_path: non_empty(labels, CHECK_PATH).map(str::to_string),
        check_scheme: non_empty(labels, CHECK_SCHEME)
            .unwrap_or(DEFAULT_CHECK_SCHEME)
            .to_string(),
        check_tcp,
        check_interval,
        check_port,
        eligible: is_eligible(labels, policy),
        ports,
    }))
}

/// Whether the enable label allows publishing under `policy`.
pub fn is_eligible(labels: &HashMap<String, String>, policy: EligibilityPolicy) -> bool {
    match non_empty(labels, ENABLE) {
        Some(raw) => match parse_bool(raw) {
            Some(enabled) => enabled,
            None => {
                log::warn!("Ignoring unparsable `{}` label {:?}", ENABLE, raw);
                false
            }
        },
        None => policy == EligibilityPolicy::Permissive,
    }
}

fn non_empty<'a>(labels: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Comma separated list, kept in order. Empty segments are preserved.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',').map(|t| t.trim().to_string()).collect()
}

/// `1`/`t`/`true` or `0`/`f`/`false`, lower, upper or title case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// `30`, `30s`, `2m` or `1h`.
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, scale) = match raw.char_indices().last()? {
        (i, 's') => (&raw[..i], 1),
        (i, 'm') => (&raw[..i], 60),
        (i, 'h') => (&raw[..i], 3600),
        _ => (raw, 1),
    };
    let value: u64 = digits.parse().ok()?;
    if value == 0 {
        return None;
    }
    Some(Duration::from_secs(value.checked_mul(scale)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const ONE_PORT: &str = r#"[{"containerPort":8080,"protocol":"tcp"}]"#;

    #[test]
    fn defaults_apply_when_labels_are_absent() {
        let spec = decode(
            &labels(&[(PORTS, ONE_PORT), (CONTAINER_NAME, "stack-web-1")]),
            EligibilityPolicy::Permissive,
        )
        .unwrap()
        .unwrap();

        assert_eq!(spec.service_name.as_deref(), Some("stack-web-1"));
        assert_eq!(spec.check_interval, Duration::from_secs(15));
        assert_eq!(spec.check_scheme, "http");
        assert!(!spec.check_tcp);
        assert_eq!(spec.check_port, None);
        assert!(spec.tags.is_empty());
        assert!(spec.eligible);
        assert_eq!(spec.ports.len(), 1);
    }

    #[test]
    fn explicit_labels_override_defaults() {
        let spec = decode(
            &labels(&[
                (PORTS, ONE_PORT),
                (CONTAINER_NAME, "stack-web-1"),
                (SERVICE_NAME, "web"),
                (SERVICE_TAGS, "a,,b"),
                (CHECK_PATH, "/health"),
                (CHECK_PORT, "9000"),
                (CHECK_SCHEME, "https"),
                (CHECK_INTERVAL, "30s"),
                (CHECK_TCP, "false"),
            ]),
            EligibilityPolicy::Strict,
        )
        .unwrap()
        .unwrap();

        assert_eq!(spec.service_name.as_deref(), Some("web"));
        assert_eq!(spec.tags, vec!["a", "", "b"]);
        assert_eq!(spec.check_path.as_deref(), Some("/health"));
        assert_eq!(spec.check_port, Some(9000));
        assert_eq!(spec.check_scheme, "https");
        assert_eq!(spec.check_interval, Duration::from_secs(30));
        assert!(!spec.eligible);
    }

    #[test]
    fn no_ports_means_nothing_to_register() {
        assert!(decode(&labels(&[]), EligibilityPolicy::Permissive)
            .unwrap()
            .is_none());
        assert!(decode(&labels(&[(PORTS, "[]")]), EligibilityPolicy::Permissive)
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_ports_are_an_error() {
        let err = decode(&labels(&[(PORTS, "not json")]), EligibilityPolicy::Permissive)
            .unwrap_err();
        assert!(matches!(err, LabelError::Ports(_)));
    }

    #[test]
    fn malformed_check_labels_are_errors() {
        let tcp = decode(
            &labels(&[(PORTS, ONE_PORT), (CHECK_TCP, "yes")]),
            EligibilityPolicy::Permissive,
        );
        assert!(matches!(tcp, Err(LabelError::Bool { label: CHECK_TCP, .. })));

        let port = decode(
            &labels(&[(PORTS, ONE_PORT), (CHECK_PORT, "http")]),
            EligibilityPolicy::Permissive,
        );
        assert!(matches!(port, Err(LabelError::Number { .. })));

        let interval = decode(
            &labels(&[(PORTS, ONE_PORT), (CHECK_INTERVAL, "soon")]),
            EligibilityPolicy::Permissive,
        );
        assert!(matches!(interval, Err(LabelError::Interval { .. })));
    }

    #[test]
    fn eligibility_policies() {
        let absent = labels(&[]);
        assert!(is_eligible(&absent, EligibilityPolicy::Permissive));
        assert!(!is_eligible(&absent, EligibilityPolicy::Strict));

        let disabled = labels(&[(ENABLE, "false")]);
        assert!(!is_eligible(&disabled, EligibilityPolicy::Permissive));
        assert!(!is_eligible(&disabled, EligibilityPolicy::Strict));

        let enabled = labels(&[(ENABLE, "True")]);
        assert!(is_eligible(&enabled, EligibilityPolicy::Strict));

        let garbage = labels(&[(ENABLE, "maybe")]);
        assert!(!is_eligible(&garbage, EligibilityPolicy::Permissive));
        assert!(!is_eligible(&garbage, EligibilityPolicy::Strict));
    }

    #[test]
    fn interval_spellings() {
        assert_eq!(parse_interval("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_interval("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_interval("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_interval("0s"), None);
        assert_eq!(parse_interval("s"), None);
    }
}
