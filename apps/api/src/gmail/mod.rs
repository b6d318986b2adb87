//! Gmail Client: OAuth2 token handling, resume search and message sending
//! over the Gmail REST API.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod docx;
pub mod parse;
pub mod query;

pub use query::ResumeSearch;

use crate::scan::MailSource;
use parse::{
    AttachmentGetResponse, MessageListResponse, MessagePart, MessageResource, MessageSummary,
};

const GMAIL_API_BASE: &str = "https://www.googleapis.com/gmail/v1";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REQUEST_TIMEOUT_SECS: u64 = 60;

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

/// A short-lived bearer token for the Gmail API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Tokens granted by the OAuth consent flow.
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access: AccessToken,
    /// Only returned on consent; absent on plain refreshes.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self, now: DateTime<Utc>) -> OAuthTokens {
        OAuthTokens {
            access: AccessToken {
                token: self.access_token,
                expires_at: self.expires_in.map(|secs| now + Duration::seconds(secs)),
            },
            refresh_token: self.refresh_token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
}

#[derive(Debug, Serialize)]
struct SendMessagePayload {
    raw: String,
}

/// A resume attachment pulled out of one email, with its text extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeAttachment {
    pub email_id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub filename: String,
    pub content: String,
    pub mime_type: String,
}

#[derive(Clone)]
pub struct GmailClient {
    inner: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GmailClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> anyhow::Result<Self> {
        let inner = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build Gmail HTTP client")?;
        Ok(Self {
            inner,
            base_url: GMAIL_API_BASE.to_string(),
            client_id,
            client_secret,
            redirect_uri,
        })
    }

    /// Google consent URL. Offline access with a forced consent prompt so the
    /// grant always carries a refresh token.
    pub fn authorization_url(&self, state: &str) -> anyhow::Result<String> {
        let scope = SCOPES.join(" ");
        let url = Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .context("Failed to build Google authorization URL")?;
        Ok(url.into())
    }

    #[tracing::instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<OAuthTokens> {
        self.token_request(&[
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> anyhow::Result<AccessToken> {
        let tokens = self
            .token_request(&[
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        Ok(tokens.access)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> anyhow::Result<OAuthTokens> {
        let response = self
            .inner
            .post(GOOGLE_TOKEN_URL)
            .form(form)
            .send()
            .await
            .context("Failed to send request to Google token endpoint")?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .context("Failed to get response body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "Google token endpoint returned an error status: {status}: {body_text}"
            ));
        }

        let token_response: TokenResponse = serde_json::from_str(&body_text)
            .context("Failed to parse JSON response from Google token endpoint")?;
        Ok(token_response.into_tokens(Utc::now()))
    }

    /// Address of the mailbox the token belongs to.
    #[tracing::instrument(skip(self, access_token))]
    pub async fn profile_email(&self, access_token: &str) -> anyhow::Result<String> {
        let url = format!("{}/users/me/profile", self.base_url);
        let profile = self
            .inner
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to send request to Gmail API (get profile)")?
            .error_for_status()
            .context("Gmail API returned an error status (get profile)")?
            .json::<ProfileResponse>()
            .await
            .context("Failed to parse JSON response from Gmail API (get profile)")?;
        Ok(profile.email_address)
    }

    #[tracing::instrument(skip(self, access_token))]
    pub async fn search_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/users/me/messages", self.base_url);
        let max_results = max_results.to_string();
        let list = self
            .inner
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("q", query), ("maxResults", max_results.as_str())])
            .send()
            .await
            .context("Failed to send request to Gmail API (list messages)")?
            .error_for_status()
            .context("Gmail API returned an error status (list messages)")?
            .json::<MessageListResponse>()
            .await
            .context("Failed to parse JSON response from Gmail API (list messages)")?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    #[tracing::instrument(skip(self, access_token))]
    pub async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> anyhow::Result<MessageResource> {
        let url = format!("{}/users/me/messages/{}", self.base_url, message_id);
        self.inner
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .with_context(|| format!("Failed to send request to Gmail API (get message) for {message_id}"))?
            .error_for_status()
            .with_context(|| format!("Gmail API returned an error status (get message) for {message_id}"))?
            .json::<MessageResource>()
            .await
            .with_context(|| format!("Failed to parse JSON response from Gmail API (get message) for {message_id}"))
    }

    #[tracing::instrument(skip(self, access_token))]
    pub async fn get_attachment(
        &self,
        access_token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url, message_id, attachment_id
        );
        let attachment = self
            .inner
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to send request to Gmail API (get attachment)")?
            .error_for_status()
            .context("Gmail API returned an error status (get attachment)")?
            .json::<AttachmentGetResponse>()
            .await
            .context("Failed to parse JSON response from Gmail API (get attachment)")?;

        let data = attachment
            .data
            .ok_or_else(|| anyhow!("Gmail API response for attachment did not contain data field"))?;
        parse::decode_base64(&data)
    }

    /// Runs the resume search and extracts the text of every resume attachment
    /// found. A message that fails to load or parse is logged and skipped.
    #[tracing::instrument(skip(self, access_token))]
    pub async fn scan_for_resumes(
        &self,
        access_token: &str,
        search: &ResumeSearch,
    ) -> anyhow::Result<Vec<ResumeAttachment>> {
        let query = search.query();
        info!("Gmail search query: {query}");

        let message_ids = self
            .search_messages(access_token, &query, search.max_results)
            .await?;
        info!("Found {} matching emails", message_ids.len());

        let mut resumes = Vec::new();
        for message_id in &message_ids {
            match self.message_resumes(access_token, message_id).await {
                Ok(found) => resumes.extend(found),
                Err(e) => warn!("Error processing message {message_id}: {e:#}"),
            }
        }

        info!("Successfully extracted {} resumes", resumes.len());
        Ok(resumes)
    }

    async fn message_resumes(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> anyhow::Result<Vec<ResumeAttachment>> {
        let message = self.get_message(access_token, message_id).await?;
        let summary = MessageSummary::from_headers(&message.payload.headers);

        let mut resumes = Vec::new();
        for part in parse::resume_parts(&message.payload) {
            let Some(bytes) = self.part_bytes(access_token, &message.id, part).await? else {
                continue;
            };
            let filename = part.filename.clone();
            let extracted = tokio::task::spawn_blocking({
                let filename = filename.clone();
                move || parse::extract_text(&filename, &bytes)
            })
            .await
            .context("Text extraction task failed")?;

            match extracted {
                Ok(Some(content)) if !content.trim().is_empty() => {
                    resumes.push(ResumeAttachment {
                        email_id: message.id.clone(),
                        subject: summary.subject.clone(),
                        from: summary.from.clone(),
                        date: summary.date.clone(),
                        filename,
                        content,
                        mime_type: part.mime_type.clone(),
                    });
                }
                Ok(Some(_)) => debug!("No text in {filename} ({message_id})"),
                Ok(None) => debug!("Skipping {filename} ({message_id}): unsupported format"),
                Err(e) => warn!("Error extracting text from {filename}: {e}"),
            }
        }
        Ok(resumes)
    }

    /// Inline body data when present, otherwise the downloaded attachment.
    async fn part_bytes(
        &self,
        access_token: &str,
        message_id: &str,
        part: &MessagePart,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(body) = &part.body else {
            return Ok(None);
        };
        if let Some(data) = &body.data_base64 {
            return parse::decode_base64(data).map(Some);
        }
        match &body.attachment_id {
            Some(attachment_id) => self
                .get_attachment(access_token, message_id, attachment_id)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Sends an HTML email from the authorized mailbox.
    #[tracing::instrument(skip(self, access_token, html))]
    pub async fn send_html(
        &self,
        access_token: &str,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> anyhow::Result<()> {
        let url = format!("{}/users/me/messages/send", self.base_url);
        let payload = SendMessagePayload {
            raw: URL_SAFE_NO_PAD.encode(build_html_message(from, to, subject, html)?),
        };

        let response = self
            .inner
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to Gmail API (send message)")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Gmail API returned an error status: {status} (send message): {body_text}"
            ));
        }
        Ok(())
    }
}

fn build_html_message(from: &str, to: &str, subject: &str, html: &str) -> anyhow::Result<String> {
    mail_builder::MessageBuilder::new()
        .from(from)
        .to(to)
        .subject(subject)
        .html_body(html)
        .write_to_string()
        .context("building message error")
}

#[async_trait]
impl MailSource for GmailClient {
    async fn refresh_access_token(&self, refresh_token: &str) -> anyhow::Result<AccessToken> {
        GmailClient::refresh_access_token(self, refresh_token).await
    }

    async fn fetch_resumes(
        &self,
        access_token: &str,
        search: &ResumeSearch,
    ) -> anyhow::Result<Vec<ResumeAttachment>> {
        self.scan_for_resumes(access_token, search).await
    }

    async fn send_html(
        &self,
        access_token: &str,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> anyhow::Result<()> {
        GmailClient::send_html(self, access_token, from, to, subject, html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> GmailClient {
        GmailClient::new(
            "client-id.apps.googleusercontent.com".to_string(),
            "secret".to_string(),
            "http://localhost:3000/zume/settings/gmail/callback".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_authorization_url_requests_offline_consent() {
        let url = client().authorization_url("abc123:42").unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("accounts.google.com"));

        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["state"], "abc123:42");
        assert_eq!(
            params["redirect_uri"],
            "http://localhost:3000/zume/settings/gmail/callback"
        );
        assert!(params["scope"].contains("gmail.readonly"));
        assert!(params["scope"].contains("gmail.send"));
    }

    #[test]
    fn test_token_response_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "ya29.a0", "expires_in": 3599, "token_type": "Bearer",
                "refresh_token": "1//0g"}"#,
        )
        .unwrap();
        let tokens = response.into_tokens(now);
        assert_eq!(tokens.access.token, "ya29.a0");
        assert_eq!(
            tokens.access.expires_at,
            Some(now + Duration::seconds(3599))
        );
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//0g"));
    }

    #[test]
    fn test_html_message_headers() {
        let raw = build_html_message(
            "recruiter@example.com",
            "hiring@example.com",
            "Resume Scan Complete - 3 CVs Analyzed",
            "<p>done</p>",
        )
        .unwrap();
        assert!(raw.contains("Subject: Resume Scan Complete - 3 CVs Analyzed"));
        assert!(raw.contains("hiring@example.com"));
        assert!(raw.contains("text/html"));
    }
}
