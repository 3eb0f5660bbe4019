// Prompt assembly: positional words, piped stdin, instruction suffixes, and
// context from local files or fetched URLs.

use std::io::{IsTerminal, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

const MAX_URL_CHARS: usize = 50_000;
const USER_AGENT: &str = concat!("ask-cli/", env!("CARGO_PKG_VERSION"));

const COMMAND_ONLY: &str = "\nReturn the command only without any other text.";
const BREAKDOWN: &str = "\nProvide a detailed breakdown of what the command does.";

/// Instruction suffixes selected on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Suffixes {
    /// `-c`: reply with a bare shell command.
    pub command: bool,
    /// `-b`: explain the command.
    pub breakdown: bool,
}

/// Join the user's words with piped input and suffixes.
///
/// Fails when there is neither a prompt nor piped input.
pub fn compose(words: &[String], stdin: Option<&str>, suffixes: Suffixes) -> Result<String> {
    let base = words.join(" ");
    let base = base.trim();
    let stdin = stdin.filter(|s| !s.trim().is_empty());

    let mut prompt = match stdin {
        Some(input) => format!("{}\nInput:\n{}", base, input),
        None if base.is_empty() => anyhow::bail!("no prompt given and nothing piped on stdin"),
        None => base.to_string(),
    };

    if suffixes.command {
        prompt.push_str(COMMAND_ONLY);
    }
    if suffixes.breakdown {
        prompt.push_str(BREAKDOWN);
    }
    Ok(prompt)
}

pub fn with_files(prompt: &str, files: &str) -> String {
    format!("Files content:\n{}\n\nPrompt: {}", files, prompt)
}

pub fn with_urls(prompt: &str, urls: &str) -> String {
    format!("URL content:\n{}\n\nPrompt: {}", urls, prompt)
}

fn frame(label: &str, content: &str) -> String {
    format!("=== {} ===\n{}", label, content)
}

/// Piped stdin, or `None` when stdin is a terminal or empty.
pub fn read_stdin() -> Result<Option<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    stdin
        .lock()
        .read_to_string(&mut buf)
        .context("reading piped input")?;
    let trimmed = buf.trim_end();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Expand comma-separated paths and glob patterns.
pub fn expand_file_list(list: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for pattern in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !pattern.contains(['*', '?', '[']) {
            paths.push(pattern.to_string());
            continue;
        }
        let before = paths.len();
        for entry in glob::glob(pattern).with_context(|| format!("invalid glob '{}'", pattern))? {
            let path = entry.with_context(|| format!("expanding '{}'", pattern))?;
            if path.is_file() {
                paths.push(path.display().to_string());
            }
        }
        if paths.len() == before {
            anyhow::bail!("no files match '{}'", pattern);
        }
    }
    Ok(paths)
}

/// Read every file in `list`, each framed with its path.
pub fn read_files(list: &str) -> Result<String> {
    let paths = expand_file_list(list)?;
    if paths.is_empty() {
        anyhow::bail!("--files given but no paths listed");
    }
    let mut sections = Vec::with_capacity(paths.len());
    for path in &paths {
        let content = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("reading {}", path))?;
        tracing::debug!(path = %path, bytes = content.len(), "attached file");
        sections.push(frame(path, &content));
    }
    Ok(sections.join("\n\n"))
}

// ---------------------------------------------------------------------------
// URLs
// ---------------------------------------------------------------------------

/// Fetch every URL, each framed with its address.
pub async fn fetch_urls(client: &reqwest::Client, urls: &[String]) -> Result<String> {
    let mut sections = Vec::with_capacity(urls.len());
    for url in urls {
        let text = fetch_url(client, url).await?;
        sections.push(frame(url, &text));
    }
    Ok(sections.join("\n\n"))
}

/// Fetch a page as readable text.
pub async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("only http:// and https:// URLs are supported: {}", url);
    }

    let response = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .with_context(|| format!("fetching {}", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!(
            "HTTP error {} fetching '{}': {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("unknown"),
        );
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = response
        .text()
        .await
        .with_context(|| format!("reading body of {}", url))?;

    let processed = if content_type.contains("text/html") {
        strip_html(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(val) => serde_json::to_string_pretty(&val).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };

    tracing::debug!(url, chars = processed.len(), "fetched url");
    Ok(truncate(&processed))
}

/// Strip HTML to text: drop script and style blocks, then tags, then decode
/// entities and collapse whitespace.
fn strip_html(html: &str) -> String {
    let without_scripts = remove_tag_blocks(html, "script");
    let without_styles = remove_tag_blocks(&without_scripts, "style");
    collapse_whitespace(&decode_html_entities(&strip_tags(&without_styles)))
}

/// Remove all content between <tag...>...</tag> (case-insensitive).
fn remove_tag_blocks(input: &str, tag_name: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let lower = input.to_ascii_lowercase();
    let open_tag = format!("<{}", tag_name);
    let close_tag = format!("</{}>", tag_name);

    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open_tag) {
        let abs_start = pos + start;
        result.push_str(&input[pos..abs_start]);
        match lower[abs_start..].find(&close_tag) {
            Some(end) => pos = abs_start + end + close_tag.len(),
            None => return result,
        }
    }
    result.push_str(&input[pos..]);
    result
}

fn strip_tags(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut in_tag = false;

    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Keep words in adjacent elements apart.
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
}

fn decode_html_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces to one and of newlines to at most two.
fn collapse_whitespace(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut prev_was_space = false;
    let mut newlines = 0;

    for ch in input.chars() {
        match ch {
            '\r' => {}
            '\n' => {
                newlines += 1;
                if newlines <= 2 {
                    // Spaces before a line break are noise.
                    while result.ends_with(' ') {
                        result.pop();
                    }
                    result.push('\n');
                }
                prev_was_space = false;
            }
            c if c.is_whitespace() => {
                if !prev_was_space && newlines == 0 {
                    result.push(' ');
                }
                prev_was_space = true;
            }
            c => {
                result.push(c);
                prev_was_space = false;
                newlines = 0;
            }
        }
    }

    result.trim().to_string()
}

fn truncate(content: &str) -> String {
    match content.char_indices().nth(MAX_URL_CHARS) {
        Some((cut, _)) => content[..cut].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_compose_words() {
        let prompt = compose(&words("list files  here"), None, Suffixes::default()).unwrap();
        assert_eq!(prompt, "list files here");
    }

    #[test]
    fn test_compose_with_stdin_and_suffixes() {
        let suffixes = Suffixes {
            command: true,
            breakdown: true,
        };
        let prompt = compose(&words("fix this"), Some("ls -z"), suffixes).unwrap();
        assert_eq!(
            prompt,
            "fix this\nInput:\nls -z\
             \nReturn the command only without any other text.\
             \nProvide a detailed breakdown of what the command does."
        );
    }

    #[test]
    fn test_compose_stdin_only() {
        let prompt = compose(&[], Some("diff --git a b"), Suffixes::default()).unwrap();
        assert_eq!(prompt, "\nInput:\ndiff --git a b");
    }

    #[test]
    fn test_compose_empty_is_error() {
        assert!(compose(&[], None, Suffixes::default()).is_err());
        assert!(compose(&words("   "), Some("  \n"), Suffixes::default()).is_err());
    }

    #[test]
    fn test_context_wrappers() {
        assert_eq!(
            with_files("explain", "=== a.rs ===\nfn main() {}"),
            "Files content:\n=== a.rs ===\nfn main() {}\n\nPrompt: explain"
        );
        assert_eq!(
            with_urls("summarize", "=== http://x ===\nhi"),
            "URL content:\n=== http://x ===\nhi\n\nPrompt: summarize"
        );
    }

    #[test]
    fn test_read_files_with_glob() {
        let dir = std::env::temp_dir().join(format!("ask_cli_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.join("b.txt"), "beta").unwrap();
        std::fs::write(dir.join("c.md"), "gamma").unwrap();

        let pattern = format!("{}/*.txt", dir.display());
        let content = read_files(&pattern).unwrap();
        let a = dir.join("a.txt").display().to_string();
        let b = dir.join("b.txt").display().to_string();
        assert_eq!(content, format!("=== {} ===\nalpha\n\n=== {} ===\nbeta", a, b));

        let list = format!("{}, {}", dir.join("c.md").display(), a);
        let content = read_files(&list).unwrap();
        assert!(content.starts_with(&format!("=== {} ===\ngamma", dir.join("c.md").display())));

        assert!(read_files(&format!("{}/*.rs", dir.display())).is_err());
        assert!(read_files(&dir.join("missing.txt").display().to_string()).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_strip_html_full_page() {
        let html = r#"<!DOCTYPE html>
<html>
<head>
    <title>Test Page</title>
    <script>console.log("test");</script>
    <STYLE>.foo { display: none; }</STYLE>
</head>
<body>
    <h1>Hello World</h1>
    <p>Fish &amp; chips are <strong>great</strong>.</p>
</body>
</html>"#;
        let result = strip_html(html);
        assert!(result.contains("Hello World"));
        assert!(result.contains("Fish & chips"));
        assert!(result.contains("great"));
        assert!(!result.contains("console.log"));
        assert!(!result.contains("display: none"));
        assert!(!result.contains('<'));
    }

    #[test]
    fn test_decode_html_entities_amp_last() {
        assert_eq!(decode_html_entities("&amp;lt;"), "&lt;");
        assert_eq!(decode_html_entities("it&#39;s &quot;ok&quot;"), "it's \"ok\"");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("Hello    world  \n\n\n\n\nfoo  bar"),
            "Hello world\n\nfoo bar"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short"), "short");
        let long = "é".repeat(MAX_URL_CHARS + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_URL_CHARS);
    }

    #[tokio::test]
    async fn test_fetch_url_strips_html() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><p>Rust is fast</p></body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let text = fetch_url(&client, &format!("{}/page", server.uri())).await.unwrap();
        assert_eq!(text, "Rust is fast");

        let err = fetch_url(&client, &format!("{}/gone", server.uri())).await.unwrap_err();
        assert!(err.to_string().contains("404"));

        assert!(fetch_url(&client, "ftp://example.com/x").await.is_err());
    }
}
