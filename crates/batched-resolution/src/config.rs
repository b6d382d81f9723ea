use std::time::Duration;

#[derive(Debug, serde::Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchingConfig {
    /// Upper bound for a single batch function call. No bound when absent.
    #[serde(deserialize_with = "duration_str::deserialize_option_duration")]
    pub timeout: Option<Duration>,
    /// How many dispatch ticks a resolution tree may go through before it is
    /// considered runaway.
    pub max_dispatch_rounds: usize,
    /// Restrict the grouped query to the requested keys (`inner_key IN keys`)
    /// instead of grouping the whole filtered source.
    pub push_down_key_filter: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_dispatch_rounds: 1024,
            push_down_key_filter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;

    use super::BatchingConfig;

    #[test]
    fn defaults() {
        let config: BatchingConfig = toml::from_str("").unwrap();
        insta::assert_debug_snapshot!(config, @r###"
        BatchingConfig {
            timeout: None,
            max_dispatch_rounds: 1024,
            push_down_key_filter: true,
        }
        "###);
    }

    #[test]
    fn all_settings() {
        let input = indoc! {r#"
            timeout = "1500ms"
            max_dispatch_rounds = 16
            push_down_key_filter = false
        "#};

        let config: BatchingConfig = toml::from_str(input).unwrap();

        pretty_assertions::assert_eq!(
            config,
            BatchingConfig {
                timeout: Some(Duration::from_millis(1500)),
                max_dispatch_rounds: 16,
                push_down_key_filter: false,
            }
        );
    }

    #[test]
    fn unknown_setting() {
        let input = indoc! {r#"
            max_rounds = 16
        "#};

        let error = toml::from_str::<BatchingConfig>(input).unwrap_err().to_string();

        assert!(error.contains("unknown field `max_rounds`"), "{error}");
    }
}
