use std::fmt;

use serde::{Deserialize, Serialize};

/// BundlePolicy controls the SDP `a=group:BUNDLE` behavior. With a single
/// `application` media section every policy produces one ICE/DTLS pair;
/// `max-bundle` is the only useful choice for this profile.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCBundlePolicy {
    #[default]
    Unspecified = 0,

    /// Allow distinct transports per media section when the peer is not
    /// bundle-aware. The data-channel profile only ever produces one.
    #[serde(rename = "max-compat")]
    MaxCompat = 1,

    /// Reuse a single ICE/DTLS pair for all channels.
    #[serde(rename = "max-bundle")]
    MaxBundle = 2,

    /// Do not emit an `a=group:BUNDLE` line at all.
    #[serde(rename = "disable")]
    Disable = 3,
}

const BUNDLE_POLICY_MAX_COMPAT_STR: &str = "max-compat";
const BUNDLE_POLICY_MAX_BUNDLE_STR: &str = "max-bundle";
const BUNDLE_POLICY_DISABLE_STR: &str = "disable";

impl From<&str> for RTCBundlePolicy {
    /// from takes a string and converts it into a BundlePolicy.
    fn from(raw: &str) -> Self {
        match raw {
            BUNDLE_POLICY_MAX_COMPAT_STR => RTCBundlePolicy::MaxCompat,
            BUNDLE_POLICY_MAX_BUNDLE_STR => RTCBundlePolicy::MaxBundle,
            BUNDLE_POLICY_DISABLE_STR => RTCBundlePolicy::Disable,
            _ => RTCBundlePolicy::Unspecified,
        }
    }
}

impl fmt::Display for RTCBundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RTCBundlePolicy::MaxCompat => write!(f, "{BUNDLE_POLICY_MAX_COMPAT_STR}"),
            RTCBundlePolicy::MaxBundle => write!(f, "{BUNDLE_POLICY_MAX_BUNDLE_STR}"),
            RTCBundlePolicy::Disable => write!(f, "{BUNDLE_POLICY_DISABLE_STR}"),
            RTCBundlePolicy::Unspecified => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_bundle_policy() {
        let tests = vec![
            ("Unspecified", RTCBundlePolicy::Unspecified),
            ("max-compat", RTCBundlePolicy::MaxCompat),
            ("max-bundle", RTCBundlePolicy::MaxBundle),
            ("disable", RTCBundlePolicy::Disable),
        ];
        for (policy_string, expected_policy) in tests {
            assert_eq!(RTCBundlePolicy::from(policy_string), expected_policy);
        }
    }
}
