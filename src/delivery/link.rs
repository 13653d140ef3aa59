//! Tracked form links

use super::Investor;
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::Serialize;
use url::Url;

/// Where the hosted form wizard lives unless configured otherwise
pub const DEFAULT_FORM_BASE_URL: &str = "https://accounts-dev.github.io/w9-form-widget/";

/// A form link issued for one investor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedLink {
    pub form_link: String,
    pub investor: Investor,
}

/// Builds form links carrying the investor's email and name
#[derive(Debug, Clone)]
pub struct LinkGenerator {
    base: Url,
}

impl LinkGenerator {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url.trim()).map_err(|e| Error::InvalidInput {
            reason: format!("form base URL '{}': {}", base_url, e),
        })?;
        Ok(Self { base })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    pub fn generate(&self, email: &str, name: &str) -> Result<GeneratedLink> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || name.is_empty() {
            return Err(Error::InvalidInput {
                reason: "Email and name are required".to_string(),
            });
        }

        let investor = Investor {
            email: email.to_string(),
            name: name.to_string(),
        };
        Ok(GeneratedLink {
            form_link: self.link_for(&investor),
            investor,
        })
    }

    /// Link for an investor already known to be valid
    pub fn link_for(&self, investor: &Investor) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("email", &investor.email)
            .append_pair("name", &investor.name);
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_encodes_query() {
        let links = LinkGenerator::new(DEFAULT_FORM_BASE_URL).unwrap();
        let link = links.generate("pat+w9@example.com", "Pat O'Doe Jr").unwrap();
        assert_eq!(
            link.form_link,
            "https://accounts-dev.github.io/w9-form-widget/?email=pat%2Bw9%40example.com&name=Pat+O%27Doe+Jr"
        );
        assert_eq!(link.investor.email, "pat+w9@example.com");
    }

    #[test]
    fn test_missing_email_or_name_rejected() {
        let links = LinkGenerator::new(DEFAULT_FORM_BASE_URL).unwrap();
        assert!(matches!(
            links.generate("", "Pat"),
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            links.generate("pat@example.com", "   "),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_custom_base_keeps_path() {
        let links = LinkGenerator::new("https://forms.example.com/w9/start").unwrap();
        let link = links.generate("a@b.co", "A B").unwrap();
        assert!(link
            .form_link
            .starts_with("https://forms.example.com/w9/start?email="));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        assert!(LinkGenerator::new("not a url").is_err());
    }
}
