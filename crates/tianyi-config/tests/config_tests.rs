#[cfg(test)]
mod tests {
    use std::io::Write;
    use tianyi_config::ConfigLoader;
    use tianyi_config::schema::*;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_vector_config_defaults() {
        let config = VectorConfig::default();
        assert_eq!(config.backend, "sqlite");
        assert_eq!(config.collection, "luotianyi_memory");
        assert_eq!(config.top_k, 3);
        assert_eq!(config.similarity_threshold, 0.5);
    }

    #[test]
    fn test_embedding_config_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "BAAI/bge-m3");
        assert_eq!(config.dimensions, 1024);
        assert_eq!(config.batch_size, 16);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_buffer_config_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.window_size, 20);
        assert!(!config.summarize);
        assert!(!config.checkpoint);
        assert!(config.checkpoint_path.is_some());
    }

    #[test]
    fn test_recall_and_io_defaults() {
        let recall = RecallConfig::default();
        assert_eq!(recall.graph_weight, 0.6);
        assert_eq!(recall.max_items, 8);
        assert_eq!(recall.max_tokens, 0);
        let io = IoConfig::default();
        assert_eq!(io.timeout_ms, 10_000);
        assert_eq!(io.retry_attempts, 2);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = TianyiConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: TianyiConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.memory.vector.collection, config.memory.vector.collection);
        assert_eq!(restored.memory.buffer.window_size, config.memory.buffer.window_size);
        assert_eq!(restored.logging.level, config.logging.level);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[memory.vector]
backend = "memory"
top_k = 5

[memory.buffer]
window_size = 3
"#;
        let config: TianyiConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.vector.backend, "memory");
        assert_eq!(config.memory.vector.top_k, 5);
        assert_eq!(config.memory.buffer.window_size, 3);
        // Defaults should fill in
        assert_eq!(config.memory.vector.collection, "luotianyi_memory");
        assert_eq!(config.memory.graph.backend, "sqlite");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_graph_options_deserialize() {
        let toml_str = r#"
[memory.graph]
backend = "memory"

[memory.graph.options]
seed_file = "data/graph/seed.json"
"#;
        let config: TianyiConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.graph.options["seed_file"], "data/graph/seed.json");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_is_valid() {
        let warnings = TianyiConfig::default().validate().unwrap();
        // Only the missing API key for the remote provider.
        assert!(warnings.iter().all(|w| w.severity != WarningSeverity::Error));
        assert!(warnings.iter().any(|w| w.field == "memory.embedding.api_key"));
    }

    #[test]
    fn test_validation_rejects_unknown_backend() {
        let mut config = TianyiConfig::default();
        config.memory.vector.backend = "chroma".into();
        let err = config.validate().unwrap_err();
        assert!(err.starts_with("Configuration errors:"));
        assert!(err.contains("memory.vector.backend"));
    }

    #[test]
    fn test_validation_rejects_zero_window_and_bad_threshold() {
        let mut config = TianyiConfig::default();
        config.memory.buffer.window_size = 0;
        config.memory.vector.similarity_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.contains("memory.buffer.window_size"));
        assert!(err.contains("memory.vector.similarity_threshold"));
    }

    #[test]
    fn test_validation_warnings_do_not_fail() {
        let mut config = TianyiConfig::default();
        config.memory.embedding.provider = "hash".into();
        config.memory.buffer.summarize = true;
        config.memory.buffer.summary_max_chars = 10;
        config.logging.format = "yaml".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "memory.buffer.summary_max_chars"));
        assert!(warnings.iter().any(|w| w.field == "logging.format"));
        assert!(warnings.iter().all(|w| w.severity == WarningSeverity::Warning));
    }

    #[test]
    fn test_warning_display_includes_hint() {
        let w = ConfigWarning {
            field: "memory.vector.top_k".into(),
            message: "top_k is 0".into(),
            severity: WarningSeverity::Error,
            hint: Some("Set to e.g. 3".into()),
        };
        let s = w.to_string();
        assert!(s.starts_with("error memory.vector.top_k"));
        assert!(s.contains("↳ Set to e.g. 3"));
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tianyi.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[memory.vector]
backend = "memory"
collection = "test_memory"

[memory.embedding]
provider = "hash"
dimensions = 64

[memory.graph]
backend = "memory"
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.memory.vector.collection, "test_memory");
        assert_eq!(config.memory.embedding.provider, "hash");
        assert_eq!(config.memory.embedding.dimensions, 64);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(loader.get().memory.vector.top_k, 3);
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tianyi.toml");
        std::fs::write(&config_path, "[memory.recall]\ngraph_weight = 2.0\n").unwrap();
        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(err.to_string().contains("graph_weight"));
    }

    #[test]
    fn test_config_loader_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tianyi.toml");
        std::fs::write(&config_path, "[memory.vector\nbackend = ").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tianyi.toml");

        std::fs::write(&config_path, "[memory.vector]\ntop_k = 4\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().memory.vector.top_k, 4);

        let shared = loader.shared();
        std::fs::write(&config_path, "[memory.vector]\ntop_k = 7\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().memory.vector.top_k, 7);
        assert_eq!(shared.read().memory.vector.top_k, 7);
    }

    #[test]
    fn test_reload_keeps_old_config_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tianyi.toml");
        std::fs::write(&config_path, "[memory.vector]\ntop_k = 4\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();

        std::fs::write(&config_path, "[memory.vector]\ntop_k = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().memory.vector.top_k, 4);
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = TianyiConfig::default();
        config.memory.embedding.batch_size = 0;
        assert!(ConfigLoader::from_config(config).is_err());
        assert!(ConfigLoader::from_config(TianyiConfig::default()).is_ok());
    }

    // ── JSON roundtrip ─────────────────────────────────────────

    #[test]
    fn test_config_json_roundtrip() {
        let config = TianyiConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: TianyiConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.memory.embedding.model, config.memory.embedding.model);
    }
}
