/// Smoke-test for the headless tier.
///
/// Launches a headless Chromium, renders <https://example.com>, and runs the
/// HTML extractor over the result.
///
/// Run with:
///   cargo run -p quarry-client --example headless_smoke --features browser
use quarry_client::{BrowserFetcher, HtmlExtractor};
use quarry_core::ExtractionRequest;
use quarry_core::traits::{ContentExtractor, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let fetcher = BrowserFetcher::new().await?;

    let url = "https://example.com";
    println!("Rendering {url} …");
    let html = fetcher.fetch(url).await?;

    assert!(
        html.contains("Example Domain"),
        "Expected heading not found in rendered HTML"
    );

    let request = ExtractionRequest::builder(url).subject("Example").build()?;
    let content = HtmlExtractor::default().extract(&html, &request);

    println!("OK, got {} bytes of rendered HTML", html.len());
    println!("Title: {:?}", content.title);
    for candidate in &content.candidates {
        println!(
            "{:>18}: {:>5} chars, score {:.1}, {}",
            candidate.method,
            candidate.text.chars().count(),
            candidate.score,
            candidate
                .rejection
                .as_ref()
                .map_or("passes".to_string(), ToString::to_string)
        );
    }
    Ok(())
}
