//! HTTP fetching for remote inputs.
//!
//! Remote inputs are first streamed straight into the transcoder. When that
//! fails, the fallback downloads a bounded prefix with [`download_prefix`].

use reqwest::header::RANGE;
use reqwest::Client;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::error::{MediaError, MediaResult};
use crate::process::StdinFeed;

/// Open a remote resource for piping into the transcoder.
pub async fn open_remote(client: &Client, url: &Url) -> MediaResult<StdinFeed> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| MediaError::fetch_failed(url, e))?;

    debug!(url = %url, status = %response.status(), "Opened remote input");

    Ok(StdinFeed::Http {
        url: url.clone(),
        response,
    })
}

/// Download at most `limit` bytes from the start of `url` into `dest`.
///
/// A `Range` request is sent, but the body is also truncated locally since
/// servers are free to ignore the header. Returns the number of bytes written.
pub async fn download_prefix<W>(client: &Client, url: &Url, limit: u64, dest: &mut W) -> MediaResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if limit == 0 {
        return Err(MediaError::fetch_failed(url, "byte limit must be positive"));
    }

    let mut response = client
        .get(url.clone())
        .header(RANGE, format!("bytes=0-{}", limit - 1))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| MediaError::fetch_failed(url, e))?;

    let mut written = 0u64;
    while written < limit {
        let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MediaError::fetch_failed(url, e))?
        else {
            break;
        };

        let remaining = usize::try_from(limit - written).unwrap_or(usize::MAX);
        let take = chunk.len().min(remaining);
        dest.write_all(&chunk[..take]).await?;
        written += take as u64;
    }
    dest.flush().await?;

    if written == 0 {
        return Err(MediaError::fetch_failed(url, "empty response body"));
    }

    info!(url = %url, bytes = written, limit, "Downloaded partial remote input");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_download_prefix_sends_range_and_truncates() {
        let server = MockServer::start().await;
        // Server ignores the range and returns everything.
        Mock::given(method("GET"))
            .and(path("/video.webm"))
            .and(header("range", "bytes=0-99"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body(4096)))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/video.webm", server.uri())).unwrap();
        let mut dest = Vec::new();
        let written = download_prefix(&Client::new(), &url, 100, &mut dest).await.unwrap();

        assert_eq!(written, 100);
        assert_eq!(dest, body(100));
    }

    #[tokio::test]
    async fn test_download_prefix_short_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(body(10)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/short.mp4", server.uri())).unwrap();
        let mut dest = Vec::new();
        let written = download_prefix(&Client::new(), &url, 1000, &mut dest).await.unwrap();

        assert_eq!(written, 10);
    }

    #[tokio::test]
    async fn test_download_prefix_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.mp4", server.uri())).unwrap();
        let err = download_prefix(&Client::new(), &url, 1000, &mut Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::NetworkFetchFailure { .. }));
    }

    #[tokio::test]
    async fn test_open_remote_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/broken.webm", server.uri())).unwrap();
        let result = open_remote(&Client::new(), &url).await;

        assert!(matches!(result, Err(MediaError::NetworkFetchFailure { .. })));
    }
}
