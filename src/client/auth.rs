use clap::ValueEnum;
use eyre::{Result, bail};
use std::str::FromStr;

pub enum Auth {
    /// Use an Admin API access token via the `X-Shopify-Access-Token` header
    AccessToken(String),
    /// Use private app API key and password via Basic Auth headers
    Basic(String, String),
}

impl Auth {
    pub fn new(
        r#type: &AuthType,
        api_key: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        match (r#type, api_key, password, token) {
            (AuthType::Token, _, _, Some(token)) => Ok(Self::AccessToken(token)),
            (AuthType::Basic, Some(api_key), Some(password), _) => {
                Ok(Self::Basic(api_key, password))
            }
            (AuthType::Token, _, _, None) => {
                bail!("Token authentication requires SHOPIFY_API_TOKEN to be set")
            }
            (AuthType::Basic, _, _, _) => bail!(
                "Basic authentication requires both SHOPIFY_API_KEY and SHOPIFY_PASSWORD to be set"
            ),
        }
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessToken(_) => write!(f, "Token"),
            Self::Basic(_, _) => write!(f, "Basic"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    Token,
    Basic,
}

impl FromStr for AuthType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "token" | "access_token" => Ok(Self::Token),
            "basic" => Ok(Self::Basic),
            _ => Err(()),
        }
    }
}
