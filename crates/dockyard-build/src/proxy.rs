//! プロキシ環境変数からビルド引数の既定値を作る

use std::collections::BTreeMap;

const PROXY_VARS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// 大文字・小文字どちらの環境変数でも拾い、両方の名前で渡す
///
/// 大文字の変数が優先される。空の値は無視する。
pub fn proxy_build_args() -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();

    for name in PROXY_VARS {
        let lower = name.to_lowercase();
        let value = [name, lower.as_str()]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|v| !v.is_empty());

        if let Some(value) = value {
            tracing::debug!(name, "Passing proxy setting as build arg");
            args.insert(name.to_string(), value.clone());
            args.insert(lower, value);
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_cases_are_set() {
        temp_env::with_vars(
            [
                ("HTTP_PROXY", None),
                ("http_proxy", Some("http://proxy:3128")),
                ("HTTPS_PROXY", Some("http://secure:3128")),
                ("https_proxy", Some("http://ignored:1")),
                ("NO_PROXY", None),
                ("no_proxy", None),
            ],
            || {
                let args = proxy_build_args();
                assert_eq!(args["HTTP_PROXY"], "http://proxy:3128");
                assert_eq!(args["http_proxy"], "http://proxy:3128");
                assert_eq!(args["HTTPS_PROXY"], "http://secure:3128");
                assert_eq!(args["https_proxy"], "http://secure:3128");
                assert!(!args.contains_key("NO_PROXY"));
                assert_eq!(args.len(), 4);
            },
        );
    }

    #[test]
    fn test_no_proxy_environment() {
        temp_env::with_vars_unset(
            [
                "HTTP_PROXY",
                "http_proxy",
                "HTTPS_PROXY",
                "https_proxy",
                "NO_PROXY",
                "no_proxy",
            ],
            || assert!(proxy_build_args().is_empty()),
        );
    }
}
