//! Minimal `.env` loader.

use std::path::Path;

/// Load `KEY=VALUE` lines from `path` into the process environment.
///
/// Variables already set in the environment win. Must run before any other
/// thread exists.
pub fn load_dotenv(path: &Path) -> usize {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return 0;
    };

    let mut loaded = 0;
    for (key, value) in parse(&contents) {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // SAFETY: called from main() before the tokio runtime is built, so the
        // process is still single-threaded.
        unsafe {
            std::env::set_var(&key, &value);
        }
        loaded += 1;
    }
    loaded
}

fn parse(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let pairs = parse(
            "# bot\nTELEGRAM_BOT_TOKEN=123:ABC\n\nexport PORT = 8080\nWEBHOOK_SECRET=\"a b\"\nbroken line\n=x\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "123:ABC".to_string()),
                ("PORT".to_string(), "8080".to_string()),
                ("WEBHOOK_SECRET".to_string(), "a b".to_string()),
            ]
        );
    }

    #[test]
    fn test_value_keeps_inner_equals() {
        let pairs = parse("AI_CHAT_ENDPOINT=http://x/chat?a=b");
        assert_eq!(pairs[0].1, "http://x/chat?a=b");
    }

    #[test]
    fn test_missing_file() {
        assert_eq!(load_dotenv(Path::new("/nonexistent/.env")), 0);
    }
}
