use crate::api::DEFAULT_NAMESPACED_TYPE;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "https://proximitybeacon.googleapis.com/v1beta1";
pub const DEFAULT_SHORT_LINK_BASE: &str = "https://our.sharecro.ws/bkn/";
pub const DEFAULT_SHORT_SUFFIX_LEN: usize = 6;

/// Registry client and attachment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub endpoint: String,
    /// OAuth bearer token; requests go unauthenticated when absent.
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
    pub namespaced_type: String,
    /// Base of the short link written into attachments.
    pub short_link_base: String,
    /// Trailing identifier bytes used in the short link.
    pub short_suffix_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            request_timeout_secs: 30,
            namespaced_type: DEFAULT_NAMESPACED_TYPE.to_string(),
            short_link_base: DEFAULT_SHORT_LINK_BASE.to_string(),
            short_suffix_len: DEFAULT_SHORT_SUFFIX_LEN,
        }
    }
}
