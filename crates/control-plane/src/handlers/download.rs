use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::Response;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: String,
    pub filename: Option<String>,
}

/// Keep the filename safe for a Content-Disposition header.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | '"' | ';' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "download.bin".to_string()
    } else {
        cleaned
    }
}

/// Stream an artifact through the server so browsers get a same-origin
/// download with a proper attachment filename. The body is proxied chunk by
/// chunk, never buffered.
#[utoipa::path(get, path = "/download", responses(
    (status = 200, description = "Artifact stream"),
    (status = 400, description = "Invalid url"),
    (status = 502, description = "Upstream fetch failed"),
))]
pub async fn download(
    State(state): State<AppState>,
    Query(q): Query<DownloadQuery>,
) -> ApiResult<Response> {
    if !q.url.starts_with("http://") && !q.url.starts_with("https://") {
        return Err(ApiError::bad_request("url must be http(s)"));
    }
    let resp = state
        .http
        .get(&q.url)
        .send()
        .await
        .map_err(|e| ApiError::bad_gateway("upstream_failed", e.to_string()))?;
    if !resp.status().is_success() {
        return Err(ApiError::bad_gateway(
            "upstream_failed",
            format!("upstream returned {}", resp.status()),
        ));
    }

    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let filename = sanitize_filename(q.filename.as_deref().unwrap_or("download.bin"));
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );
    if let Some(len) = resp.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .map_err(|e| ApiError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::sanitize_filename;

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_filename("app.apk"), "app.apk");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("a\"b;c.ipa"), "a_b_c.ipa");
        assert_eq!(sanitize_filename(""), "download.bin");
        assert_eq!(sanitize_filename("..."), "download.bin");
        assert_eq!(sanitize_filename("evil\r\nheader"), "evilheader");
    }
}
