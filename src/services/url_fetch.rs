//! Fetches linked articles and extracts readable text, with a scraping-proxy
//! fallback chain. Hosts that should never be stored are filtered by the
//! caller via [`crate::domain::post::is_skipped_url_host`] before a URL ever
//! reaches this module.

use std::io::Cursor;
use std::time::Duration;

use crate::config::PipelineConfig;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub const NO_READABLE_CONTENT: &str = "Could not extract readable content";

pub struct FetchedUrl {
    pub content: String,
    pub raw_html: String,
}

/// Direct fetch, then scraping-proxy, then premium-proxy, in that order.
/// Each attempt is a plain GET through a differently-configured client;
/// only the first successful body is used.
pub async fn fetch_and_extract(config: &PipelineConfig, url: &str) -> FetchedUrl {
    let direct = fetch_raw_html(url, None).await;

    let raw_html = match direct {
        Ok(html) => html,
        Err(direct_err) => {
            if let Some(ref key) = config.scraping_proxy_key {
                match fetch_raw_html(url, Some(key)).await {
                    Ok(html) => html,
                    Err(_) => {
                        if let Some(ref key) = config.premium_proxy_key {
                            match fetch_raw_html(url, Some(key)).await {
                                Ok(html) => html,
                                Err(e) => {
                                    return FetchedUrl {
                                        content: format!("Error fetching content: {e}"),
                                        raw_html: String::new(),
                                    };
                                }
                            }
                        } else {
                            return FetchedUrl {
                                content: format!("Error fetching content: {direct_err}"),
                                raw_html: String::new(),
                            };
                        }
                    }
                }
            } else {
                return FetchedUrl {
                    content: format!("Error fetching content: {direct_err}"),
                    raw_html: String::new(),
                };
            }
        }
    };

    let content = extract_readable_text(url, &raw_html).unwrap_or_else(|| NO_READABLE_CONTENT.to_string());
    FetchedUrl { content, raw_html }
}

async fn fetch_raw_html(url: &str, proxy_key: Option<&str>) -> Result<String, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Some(key) = proxy_key {
        builder = builder.default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(key) {
                headers.insert("X-Proxy-Key", value);
            }
            headers
        });
    }

    let client = builder.build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    response.text().await
}

/// Runs the body through `readability`, then collapses extracted
/// paragraphs to single-spaced lines joined by blank lines.
fn extract_readable_text(url: &str, html: &str) -> Option<String> {
    let parsed_url = url::Url::parse(url).ok()?;
    let mut cursor = Cursor::new(html.as_bytes());
    let product = readability::extractor::extract(&mut cursor, &parsed_url).ok()?;

    let cleaned: Vec<String> = product
        .content
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_sentinels_are_distinguishable_from_real_content() {
        assert!(NO_READABLE_CONTENT.starts_with("Could not extract"));
        let err = format!("Error fetching content: {}", "timed out");
        assert!(err.starts_with("Error fetching content:"));
    }
}
