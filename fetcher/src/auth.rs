//! Per-provider bearer tokens.
//!
//! Tokens are supplied by the caller (typically read from environment
//! variables named in the configuration); this module only decides which one
//! accompanies a given request.

use weightsync_common::Provider;

/// Optional API tokens for each supported provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Token sent to the Hugging Face Hub.
    pub huggingface: Option<String>,
    /// Token sent to CivitAI.
    pub civitai: Option<String>,
}

impl Credentials {
    /// The bearer token for `provider`, if one is configured and non-blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use weightsync_common::Provider;
    /// use weightsync_fetcher::auth::Credentials;
    ///
    /// let creds = Credentials { huggingface: Some("hf_abc".to_owned()), civitai: None };
    /// assert_eq!(creds.token_for(Provider::HuggingFaceFile), Some("hf_abc"));
    /// assert_eq!(creds.token_for(Provider::CivitAi), None);
    /// ```
    #[must_use]
    pub fn token_for(&self, provider: Provider) -> Option<&str> {
        let token = match provider {
            Provider::HuggingFaceFile | Provider::HuggingFaceTree => self.huggingface.as_deref(),
            Provider::CivitAi => self.civitai.as_deref(),
            Provider::Unsupported => None,
        };
        token.map(str::trim).filter(|t| !t.is_empty())
    }

    /// Format the `Authorization` header value for `provider`.
    #[must_use]
    pub fn authorization(&self, provider: Provider) -> Option<String> {
        self.token_for(provider).map(|token| format!("Bearer {token}"))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("huggingface", &self.huggingface.as_ref().map(|_| "<redacted>"))
            .field("civitai", &self.civitai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_ignored() {
        let creds = Credentials {
            huggingface: Some("   ".to_owned()),
            civitai: Some("civ".to_owned()),
        };
        assert_eq!(creds.authorization(Provider::HuggingFaceTree), None);
        assert_eq!(
            creds.authorization(Provider::CivitAi).as_deref(),
            Some("Bearer civ")
        );
        assert_eq!(creds.authorization(Provider::Unsupported), None);
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let creds = Credentials {
            huggingface: Some("hf_secret".to_owned()),
            civitai: None,
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hf_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
