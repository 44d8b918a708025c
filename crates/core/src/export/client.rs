use std::io::{Cursor, Read};
use std::time::Duration;

use serde::Deserialize;
use ureq::{Agent, AgentBuilder};

use crate::config::ExportConfig;
use crate::{AlbumAudioError, Result};

/// Everything the encoding service needs for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    /// PNG still frame.
    pub image: Vec<u8>,
    /// WAV soundtrack, if audio was requested.
    pub audio: Option<Vec<u8>>,
    pub duration_secs: f32,
    pub fps: u32,
}

/// The external video encoder.
pub trait EncoderClient: Send {
    /// Liveness check. Fails with [`AlbumAudioError::ServerUnavailable`] when
    /// the service cannot be reached.
    fn health(&self) -> Result<()>;

    /// Sends the request and returns the video bytes. `uploaded` runs once
    /// the whole payload has been handed over and the service is encoding.
    fn encode(&self, request: &EncodeRequest, uploaded: &mut dyn FnMut()) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Blocking HTTP client for the encoder's `GET /health` and `POST /encode`.
pub struct HttpEncoderClient {
    base_url: String,
    health_agent: Agent,
    encode_agent: Agent,
}

impl HttpEncoderClient {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            base_url: config.server_url.trim_end_matches('/').to_string(),
            health_agent: AgentBuilder::new()
                .timeout(Duration::from_secs(config.health_timeout_secs.max(1)))
                .build(),
            encode_agent: AgentBuilder::new()
                .timeout(Duration::from_secs(config.encode_timeout_secs.max(1)))
                .build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl EncoderClient for HttpEncoderClient {
    fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        self.health_agent
            .get(&url)
            .call()
            .map(|_| ())
            .map_err(|err| health_error(&url, err))
    }

    fn encode(&self, request: &EncodeRequest, uploaded: &mut dyn FnMut()) -> Result<Vec<u8>> {
        let url = format!("{}/encode", self.base_url);
        let boundary = format!("----sticker-album-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, request);
        let length = body.len();
        tracing::debug!(%url, bytes = length, "uploading export payload");

        let response = self
            .encode_agent
            .post(&url)
            .set("Content-Type", &format!("multipart/form-data; boundary={boundary}"))
            .set("Content-Length", &length.to_string())
            .send(UploadReader::new(body, uploaded));

        match response {
            Ok(response) => read_video(response.into_reader()),
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                Err(encoding_error(code, &text))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(AlbumAudioError::ServerUnavailable(format!("{url}: {transport}")))
            }
        }
    }
}

impl std::fmt::Debug for HttpEncoderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEncoderClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Every failed health check means the service is unusable.
fn health_error(url: &str, error: ureq::Error) -> AlbumAudioError {
    match error {
        ureq::Error::Status(code, _) => {
            AlbumAudioError::ServerUnavailable(format!("health check at {url} returned status {code}"))
        }
        ureq::Error::Transport(transport) => AlbumAudioError::ServerUnavailable(format!("{url}: {transport}")),
    }
}

fn read_video(mut reader: impl Read) -> Result<Vec<u8>> {
    let mut video = Vec::new();
    reader
        .read_to_end(&mut video)
        .map_err(|err| AlbumAudioError::Http(format!("video download interrupted: {err}")))?;
    Ok(video)
}

/// Request body that reports when its last byte has been taken.
struct UploadReader<'a> {
    body: Cursor<Vec<u8>>,
    uploaded: Option<&'a mut dyn FnMut()>,
}

impl<'a> UploadReader<'a> {
    fn new(body: Vec<u8>, uploaded: &'a mut dyn FnMut()) -> Self {
        Self {
            body: Cursor::new(body),
            uploaded: Some(uploaded),
        }
    }
}

impl Read for UploadReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.body.read(buf)?;
        if read == 0 && !buf.is_empty() {
            if let Some(uploaded) = self.uploaded.take() {
                uploaded();
            }
        }
        Ok(read)
    }
}

/// Turns a non-2xx body into an error carrying the service's own message.
pub(crate) fn encoding_error(status: u16, body: &str) -> AlbumAudioError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return AlbumAudioError::Encoding(parsed.error);
    }
    let text = body.trim();
    if text.is_empty() {
        AlbumAudioError::Encoding(format!("encoding failed with status {status}"))
    } else {
        AlbumAudioError::Encoding(text.to_string())
    }
}

pub(crate) fn multipart_body(boundary: &str, request: &EncodeRequest) -> Vec<u8> {
    let mut body = Vec::with_capacity(
        request.image.len() + request.audio.as_ref().map_or(0, Vec::len) + 1024,
    );
    push_file(&mut body, boundary, "image", "frame.png", "image/png", &request.image);
    if let Some(audio) = &request.audio {
        push_file(&mut body, boundary, "audio", "audio.wav", "audio/wav", audio);
    }
    push_field(&mut body, boundary, "duration", &request.duration_secs.to_string());
    push_field(&mut body, boundary, "fps", &request.fps.to_string());
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn push_file(body: &mut Vec<u8>, boundary: &str, name: &str, file_name: &str, mime: &str, data: &[u8]) {
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
}

fn push_field(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_surface_verbatim() {
        let err = encoding_error(500, r#"{"error":"ffmpeg exited with code 1"}"#);
        assert_eq!(err.to_string(), "ffmpeg exited with code 1");

        assert_eq!(encoding_error(502, "Bad Gateway\n").to_string(), "Bad Gateway");
        assert_eq!(encoding_error(500, "").to_string(), "encoding failed with status 500");
    }

    #[test]
    fn multipart_carries_every_field() {
        let request = EncodeRequest {
            image: b"PNGDATA".to_vec(),
            audio: Some(b"RIFFDATA".to_vec()),
            duration_secs: 16.0,
            fps: 30,
        };
        let body = String::from_utf8(multipart_body("XYZ", &request)).unwrap();

        assert!(body.starts_with("--XYZ\r\n"));
        assert!(body.contains("name=\"image\"; filename=\"frame.png\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n"));
        assert!(body.contains("name=\"audio\"; filename=\"audio.wav\""));
        assert!(body.contains("name=\"duration\"\r\n\r\n16\r\n"));
        assert!(body.contains("name=\"fps\"\r\n\r\n30\r\n"));
        assert!(body.ends_with("--XYZ--\r\n"));

        let silent = EncodeRequest { audio: None, ..request };
        let body = String::from_utf8(multipart_body("XYZ", &silent)).unwrap();
        assert!(!body.contains("name=\"audio\""));
    }

    #[test]
    fn failed_health_checks_mean_the_server_is_unavailable() {
        let status = ureq::Response::new(503, "Service Unavailable", "").unwrap();
        let err = health_error("http://encoder/health", ureq::Error::Status(503, status));
        assert!(err.is_server_unavailable());
        assert!(err.to_string().contains("not running"));
        assert!(err.to_string().contains("503"));

        let client = HttpEncoderClient::new(&ExportConfig {
            server_url: "no scheme here/".to_string(),
            ..ExportConfig::default()
        });
        assert_eq!(client.base_url(), "no scheme here");
        assert!(client.health().unwrap_err().is_server_unavailable());
    }

    #[test]
    fn reports_the_upload_once_drained() {
        let mut calls = 0;
        let mut counter = || calls += 1;
        let mut reader = UploadReader::new(b"payload".to_vec(), &mut counter);

        let mut first = [0u8; 4];
        reader.read_exact(&mut first).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(reader.read(&mut first).unwrap(), 0);
        drop(reader);

        assert_eq!(rest, b"load");
        assert_eq!(calls, 1);
    }

    #[test]
    fn interrupted_downloads_are_http_errors() {
        struct Dropped;
        impl Read for Dropped {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            }
        }

        assert_eq!(read_video(&b"MP4"[..]).unwrap(), b"MP4");
        let err = read_video(Dropped).unwrap_err();
        assert!(matches!(err, AlbumAudioError::Http(_)));
        assert!(!err.is_server_unavailable());
    }
}
