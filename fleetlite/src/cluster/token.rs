use fleetlite_shared::{FleetError, FleetResult};
use regex::Regex;
use std::fmt;

const REDACTED: &str = "******";

/// Join credential printed by the master's init command.
///
/// Held in memory only. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinToken(String);

impl JoinToken {
    /// Extract the token from init output using a pattern with one capture group.
    pub fn extract(output: &str, pattern: &Regex) -> FleetResult<Self> {
        pattern
            .captures(output)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str().trim())
            .filter(|token| !token.is_empty())
            .map(|token| JoinToken(token.to_string()))
            .ok_or(FleetError::TokenNotFound)
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Replace every occurrence of the token in `text`.
    pub fn redact(&self, text: &str) -> String {
        text.replace(&self.0, REDACTED)
    }
}

impl fmt::Debug for JoinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JoinToken").field(&REDACTED).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ClusterOptions;

    const KUBEADM_OUTPUT: &str = "\
Your Kubernetes control-plane has initialized successfully!

Then you can join any number of worker nodes by running the following on each as root:

kubeadm join 192.168.7.2:6443 --token abcdef.0123456789abcdef \\
\t--discovery-token-ca-cert-hash sha256:1234
";

    fn default_pattern() -> Regex {
        ClusterOptions::default().token_regex().unwrap()
    }

    #[test]
    fn test_extracts_kubeadm_token() {
        let token = JoinToken::extract(KUBEADM_OUTPUT, &default_pattern()).unwrap();
        assert_eq!(token.secret(), "abcdef.0123456789abcdef");
    }

    #[test]
    fn test_missing_token() {
        let err = JoinToken::extract("[init] error execution phase preflight", &default_pattern())
            .unwrap_err();
        assert!(matches!(err, FleetError::TokenNotFound));

        // Wrong shape is not a token
        let err = JoinToken::extract("--token ABC", &default_pattern()).unwrap_err();
        assert!(matches!(err, FleetError::TokenNotFound));
    }

    #[test]
    fn test_custom_pattern() {
        let pattern = Regex::new(r"join-secret=(\S+)").unwrap();
        let token = JoinToken::extract("ok\njoin-secret=s3cr3t\n", &pattern).unwrap();
        assert_eq!(token.secret(), "s3cr3t");
    }

    #[test]
    fn test_token_is_redacted() {
        let token = JoinToken::extract(KUBEADM_OUTPUT, &default_pattern()).unwrap();
        assert!(!format!("{:?}", token).contains("abcdef"));
        assert_eq!(
            token.redact("kubeadm join x --token abcdef.0123456789abcdef"),
            "kubeadm join x --token ******"
        );
    }
}
