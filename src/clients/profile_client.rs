use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Client for the dashboard app service, used for display-profile lookups.
#[derive(Debug)]
pub struct ProfileClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// Profile payload returned by the app service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

impl ProfileClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    /// Build a client from configuration, if an app service is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let base_url = config.app_service_url.clone()?;
        let jwt_secret = config.cloud_auth_jwt_secret.clone()?;
        Some(Self::new(
            base_url,
            jwt_secret,
            config.cloud_service_name.clone(),
        ))
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .expect("Failed to generate JWT")
    }

    /// Look up the display profile for one user.
    pub async fn get_profile(&self, uid: &str) -> Result<ProfileResponse, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/users/{}/profile", self.base_url, uid);
        self.client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?
            .json()
            .await
    }
}
