#[cfg(test)]
mod tests {
    use tianyi_core::*;

    // ── Event tests ────────────────────────────────────────────

    #[test]
    fn test_event_constructors() {
        let e = MemoryEvent::user("你好");
        assert_eq!(e.role, Role::User);
        assert_eq!(e.text, "你好");
        assert!(e.metadata.is_empty());
        assert_eq!(MemoryEvent::agent("hi").role, Role::Agent);
    }

    #[test]
    fn test_event_transcript_line() {
        let e = MemoryEvent::agent("今天也要元气满满");
        assert_eq!(e.transcript_line(), "agent: 今天也要元气满满");
    }

    #[test]
    fn test_event_metadata_builder() {
        let e = MemoryEvent::user("x").with_metadata("channel", "gui");
        assert_eq!(e.metadata.get("channel").map(String::as_str), Some("gui"));
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let e = MemoryEvent::user("serde test").with_metadata("k", "v");
        let json = serde_json::to_string(&e).unwrap();
        let restored: MemoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, e);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Agent);
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_estimate_tokens_minimum_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    // ── Record tests ───────────────────────────────────────────

    #[test]
    fn test_entity_builder_defaults_name_to_id() {
        let e = GraphEntity::new("luotianyi", "person");
        assert_eq!(e.display_name(), "luotianyi");
        let e = e.with_name("洛天依").with_alias("天依").with_attribute("summary", "虚拟歌手");
        assert_eq!(e.display_name(), "洛天依");
        assert_eq!(e.aliases, vec!["天依".to_string()]);
        assert_eq!(e.summary(), Some("虚拟歌手"));
    }

    #[test]
    fn test_entity_serde_uses_type_key() {
        let e = GraphEntity::new("a", "song");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "song");
    }

    #[test]
    fn test_relation_default_id_is_stable() {
        let a = GraphRelation::new("洛天依", "type", "VOCALOID");
        let b = GraphRelation::new("洛天依", "type", "VOCALOID");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "洛天依-[type]->VOCALOID");
        assert_eq!(a.other_end("洛天依"), Some("VOCALOID"));
        assert_eq!(a.other_end("VOCALOID"), Some("洛天依"));
        assert_eq!(a.other_end("言和"), None);
    }

    #[test]
    fn test_retrieval_score_is_clamped() {
        let r = RetrievalResult::new("x", 1.7, Provenance::Vector);
        assert_eq!(r.score, 1.0);
        let r = RetrievalResult::new("x", -0.2, Provenance::Graph);
        assert_eq!(r.score, 0.0);
    }

    // ── Instruction tests ──────────────────────────────────────

    #[test]
    fn test_instruction_kind() {
        assert_eq!(Instruction::vector("x").kind(), InstructionKind::Vector);
        assert_eq!(
            Instruction::Entity(GraphEntity::new("a", "t")).kind(),
            InstructionKind::Entity
        );
        assert_eq!(
            Instruction::Relation(GraphRelation::new("a", "r", "b")).kind(),
            InstructionKind::Relation
        );
    }

    #[test]
    fn test_instruction_serde_shape() {
        let ins = Instruction::Vector(VectorWrite::new("用户喜欢甜食").with_id("abc"));
        let json = serde_json::to_value(&ins).unwrap();
        assert_eq!(json["kind"], "vector");
        assert_eq!(json["payload"]["text"], "用户喜欢甜食");
        let restored: Instruction = serde_json::from_value(json).unwrap();
        assert_eq!(restored, ins);
    }

    #[test]
    fn test_write_outcome_accounting() {
        let mut outcome = WriteOutcome::default();
        assert!(outcome.is_complete());
        outcome.record_success(InstructionKind::Vector);
        outcome.record_success(InstructionKind::Vector);
        outcome.record_failure(
            InstructionKind::Relation,
            TianyiError::DanglingReference { relation: "r".into(), missing: "x".into() },
        );
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failure_count(), 1);
        assert!(!outcome.is_complete());
        assert!(outcome.succeeded.contains(&InstructionKind::Vector));
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = TianyiError::DimensionMismatch { expected: 1024, actual: 384 };
        let s = err.to_string();
        assert!(s.contains("1024"));
        assert!(s.contains("384"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(TianyiError::StoreUnavailable("down".into()).is_retryable());
        assert!(TianyiError::EmbeddingUnavailable("503".into()).is_retryable());
        assert!(!TianyiError::DimensionMismatch { expected: 3, actual: 4 }.is_retryable());
        assert!(
            !TianyiError::DanglingReference { relation: "r".into(), missing: "m".into() }
                .is_retryable()
        );
    }

    #[test]
    fn test_error_duplicate_keeps_variant() {
        let err = TianyiError::EmbeddingUnavailable("503".into());
        assert!(matches!(err.duplicate(), TianyiError::EmbeddingUnavailable(s) if s == "503"));
        let io: TianyiError = std::io::Error::other("disk").into();
        let copy = io.duplicate();
        assert!(matches!(copy, TianyiError::Other(_)));
        assert!(copy.to_string().contains("disk"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: TianyiError = io_err.into();
        assert!(err.to_string().contains("file missing"));
    }
}
