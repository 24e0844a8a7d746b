//! Upload of a finalized take to the transcription service
//!
//! Posts the WAV payload as multipart form data and parses the service's
//! JSON reply. The caller owns retry policy; an upload failure never
//! consumes the artifact, so the same take can be posted again.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use crate::artifact::AudioArtifact;

#[derive(Debug, Clone)]
pub enum UploadError {
    Network(String),
    Service { status: u16, message: String },
    Parse(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Network(e) => write!(f, "Upload request failed: {}", e),
            UploadError::Service { status, message } => {
                write!(f, "Transcription service error ({}): {}", status, message)
            }
            UploadError::Parse(e) => write!(f, "Invalid transcription response: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

/// Successful upload result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionOutcome {
    pub transcription: String,
    /// Conversation session the service associated the take with, if any.
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    transcription: String,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
}

fn http_client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Posts takes to a single transcription endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    endpoint: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Send the artifact's WAV payload and await the transcription.
    pub async fn upload(&self, artifact: &AudioArtifact) -> Result<TranscriptionOutcome, UploadError> {
        log::info!(
            "uploading recording {} ({} bytes)",
            artifact.id(),
            artifact.wav_bytes().len()
        );

        let part = multipart::Part::bytes(artifact.wav_bytes().to_vec())
            .file_name("narration.wav")
            .mime_str("audio/wav")
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let form = multipart::Form::new().part("audio", part);

        let response = http_client()
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            log::error!("transcription service returned {}: {}", status, message);
            return Err(UploadError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Parse(e.to_string()))?;

        log::info!(
            "transcription received for {} ({} chars)",
            artifact.id(),
            parsed.transcription.len()
        );

        Ok(TranscriptionOutcome {
            transcription: parsed.transcription,
            session_id: parsed.session_id,
        })
    }
}
