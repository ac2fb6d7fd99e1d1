//! Extraction layer: turns dialogue into memory instructions and queries into
//! candidate entity names.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use tianyi_config::ExtractionConfig;
use tianyi_core::{
    GraphEntity, GraphRelation, Instruction, MemoryEvent, RecordId, Result, Role, TianyiError,
    VectorRecord, VectorWrite,
};
use tianyi_llm::{CompletionRequest, LlmProvider};

use crate::graph::GraphStore;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Writes derived from `event`. An empty vector means nothing worth keeping.
    async fn extract_instructions(
        &self,
        event: &MemoryEvent,
        recent_context: &[MemoryEvent],
    ) -> Result<Vec<Instruction>>;

    /// Best-effort candidate entity names mentioned in `query`.
    async fn resolve_entities(&self, query: &str) -> Result<Vec<String>>;

    /// The vector records the latest recall surfaced. Extractors that can
    /// update existing memories offer these to the model.
    fn note_related(&self, _records: &[VectorRecord]) {}
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ── Lexicon extractor ──────────────────────────────────────────

/// Deterministic extractor with no model behind it.
///
/// Stores turns verbatim and resolves entities by looking for known names in
/// the query. The lexicon only changes on [`LexiconExtractor::refresh`] or
/// [`LexiconExtractor::set_lexicon`].
pub struct LexiconExtractor {
    store_agent_turns: bool,
    min_chars: usize,
    lexicon: RwLock<Vec<String>>,
}

impl LexiconExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            store_agent_turns: config.store_agent_turns,
            min_chars: config.min_chars,
            lexicon: RwLock::new(Vec::new()),
        }
    }

    pub fn with_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_lexicon(names.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the known names.
    pub fn set_lexicon(&self, names: Vec<String>) {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        // Longest first so the most specific name wins the scan order.
        names.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        names.dedup();
        *self.lexicon.write() = names;
    }

    /// Reload the lexicon from every entity name and alias in `graph`.
    pub async fn refresh(&self, graph: &dyn GraphStore) -> Result<usize> {
        let names = graph.entity_names().await?;
        self.set_lexicon(names);
        let len = self.lexicon.read().len();
        debug!(names = len, "entity lexicon refreshed");
        Ok(len)
    }

    pub fn lexicon_len(&self) -> usize {
        self.lexicon.read().len()
    }
}

#[async_trait]
impl Extractor for LexiconExtractor {
    async fn extract_instructions(
        &self,
        event: &MemoryEvent,
        _recent_context: &[MemoryEvent],
    ) -> Result<Vec<Instruction>> {
        if event.role == Role::Agent && !self.store_agent_turns {
            return Ok(vec![]);
        }
        let text = event.text.trim();
        if text.chars().count() < self.min_chars {
            return Ok(vec![]);
        }
        let write = VectorWrite::new(text)
            .with_metadata("source", event.role.as_str())
            .with_metadata("timestamp", event.timestamp.format("%Y-%m-%d").to_string());
        Ok(vec![Instruction::Vector(write)])
    }

    async fn resolve_entities(&self, query: &str) -> Result<Vec<String>> {
        let query = query.to_lowercase();
        let lexicon = self.lexicon.read();
        let mut seen = HashSet::new();
        Ok(lexicon
            .iter()
            .filter(|name| query.contains(&name.to_lowercase()))
            .filter(|name| seen.insert(name.to_lowercase()))
            .cloned()
            .collect())
    }
}

// ── Command extractor ──────────────────────────────────────────

/// One line of model output, e.g. `g_entity(id='洛天依', type='person', name='洛天依')`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    VAdd { document: String },
    VUpdate { uuid: String, new_document: String },
    GEntity { id: String, entity_type: String, name: String },
    GRelation { source: String, target: String, relation_type: String },
    GSearchEntity { entity_name: String },
}

impl Command {
    fn from_call(name: &str, args: &[(String, String)]) -> std::result::Result<Self, String> {
        let arg = |key: &str| -> std::result::Result<String, String> {
            args.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| format!("{}: missing argument '{}'", name, key))
        };
        match name {
            "v_add" => Ok(Command::VAdd {
                document: arg("document")?,
            }),
            "v_update" => Ok(Command::VUpdate {
                uuid: arg("uuid")?,
                new_document: arg("new_document")?,
            }),
            "g_entity" => {
                let id = arg("id")?;
                let name = arg("name").unwrap_or_else(|_| id.clone());
                Ok(Command::GEntity {
                    entity_type: arg("type")?,
                    id,
                    name,
                })
            }
            "g_relation" => Ok(Command::GRelation {
                source: arg("source")?,
                target: arg("target")?,
                relation_type: arg("type")?,
            }),
            "g_search_entity" => Ok(Command::GSearchEntity {
                entity_name: arg("entity_name")?,
            }),
            other => Err(format!("unknown command '{}'", other)),
        }
    }

    /// The write this command stands for. Searches are not writes.
    pub fn into_instruction(self) -> Option<Instruction> {
        match self {
            Command::VAdd { document } => Some(Instruction::Vector(
                VectorWrite::new(document)
                    .with_metadata("source", "memory_writer")
                    .with_metadata("timestamp", today()),
            )),
            Command::VUpdate { uuid, new_document } => Some(Instruction::Vector(
                VectorWrite::update(uuid, new_document)
                    .with_metadata("source", "memory_writer")
                    .with_metadata("timestamp", today()),
            )),
            Command::GEntity {
                id,
                entity_type,
                name,
            } => Some(Instruction::Entity(
                GraphEntity::new(id, entity_type).with_name(name),
            )),
            Command::GRelation {
                source,
                target,
                relation_type,
            } => Some(Instruction::Relation(GraphRelation::new(
                source,
                relation_type,
                target,
            ))),
            Command::GSearchEntity { .. } => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quote = |s: &str| s.replace('\\', "\\\\").replace('\'', "\\'");
        match self {
            Command::VAdd { document } => write!(f, "v_add(document='{}')", quote(document)),
            Command::VUpdate { uuid, new_document } => write!(
                f,
                "v_update(uuid='{}', new_document='{}')",
                quote(uuid),
                quote(new_document)
            ),
            Command::GEntity {
                id,
                entity_type,
                name,
            } => write!(
                f,
                "g_entity(id='{}', type='{}', name='{}')",
                quote(id),
                quote(entity_type),
                quote(name)
            ),
            Command::GRelation {
                source,
                target,
                relation_type,
            } => write!(
                f,
                "g_relation(source='{}', target='{}', type='{}')",
                quote(source),
                quote(target),
                quote(relation_type)
            ),
            Command::GSearchEntity { entity_name } => {
                write!(f, "g_search_entity(entity_name='{}')", quote(entity_name))
            }
        }
    }
}

/// Split `key='v', key2="v, w"` on top-level commas, honoring quotes and
/// backslash escapes inside them.
fn split_args(raw: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ',') => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".into());
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
        .into_iter()
        .map(|part| {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("argument without '=': {}", part.trim()))?;
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .unwrap_or(value);
            Ok((key.trim().to_string(), unquoted.to_string()))
        })
        .collect()
}

fn parse_line(line: &str) -> std::result::Result<Command, String> {
    let open = line.find('(').ok_or("no argument list")?;
    let close = line.rfind(')').filter(|&c| c > open).ok_or("no closing parenthesis")?;
    let name = line[..open].trim();
    let args = split_args(&line[open + 1..close])?;
    Command::from_call(name, &args)
}

/// Parse model output, one command per line. Parsing stops at the first line
/// starting with `##`; lines that do not parse are skipped.
pub fn parse_commands(output: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.starts_with("##") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(command) => commands.push(command),
            Err(reason) => warn!(line, reason = %reason, "skipping malformed memory command"),
        }
    }
    commands
}

const WRITER_PROMPT: &str = "你是洛天依的记忆管理模块。根据最近的对话，决定需要长期记住的内容。\n\
每行输出一条指令，只能使用以下格式：\n\
v_add(document='要记住的一句话')\n\
v_update(uuid='相关记忆的ID', new_document='更新后的内容')\n\
g_entity(id='实体id', type='实体类型', name='实体名称')\n\
g_relation(source='实体id', target='实体id', type='关系类型')\n\
已有相关记忆需要修改时用 v_update，不要重复写入最近写入过的内容。\n\
没有需要记住的内容时输出 ## 结束。";

const SEARCH_PROMPT: &str = "你是洛天依的记忆检索模块。找出用户问题中提到的知识图谱实体。\n\
每行输出一条指令：g_search_entity(entity_name='实体名称')\n\
没有实体时输出 ## 结束。";

/// Vector writes remembered to keep the model from repeating itself.
const RECENT_WRITES: usize = 5;

/// Characters of a record id shown to the model.
const SHORT_ID_CHARS: usize = 6;

fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_CHARS).collect()
}

/// Model-backed extractor speaking the line-per-command format.
///
/// The writer prompt lists the memories the last recall surfaced under short
/// ids; `v_update` names one of them by that prefix.
pub struct CommandExtractor<P: LlmProvider> {
    provider: Arc<P>,
    related: Mutex<Vec<(RecordId, String)>>,
    recent_writes: Mutex<VecDeque<Command>>,
}

impl<P: LlmProvider> CommandExtractor<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            related: Mutex::new(Vec::new()),
            recent_writes: Mutex::new(VecDeque::with_capacity(RECENT_WRITES)),
        }
    }

    /// The related record whose id starts with `prefix`, if exactly one does.
    fn resolve_record_id(&self, prefix: &str) -> Option<RecordId> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return None;
        }
        let related = self.related.lock();
        let mut matches = related.iter().filter(|(id, _)| id.starts_with(prefix));
        let (first, _) = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first.clone())
    }

    fn remember_write(&self, command: &Command) {
        let mut recent = self.recent_writes.lock();
        if recent.len() == RECENT_WRITES {
            recent.pop_front();
        }
        recent.push_back(command.clone());
    }

    fn writer_prompt(&self, event: &MemoryEvent, recent_context: &[MemoryEvent]) -> String {
        let mut prompt = String::from("最近对话：\n");
        for turn in recent_context {
            prompt.push_str(&turn.transcript_line());
            prompt.push('\n');
        }
        prompt.push_str("当前对话：\n");
        prompt.push_str(&event.transcript_line());

        let related = self.related.lock();
        if !related.is_empty() {
            prompt.push_str("\n相关记忆：\n");
            for (id, text) in related.iter() {
                prompt.push_str(&format!("ID: {}, Content: {}\n", short_id(id), text));
            }
        }
        let recent = self.recent_writes.lock();
        if !recent.is_empty() {
            prompt.push_str("\n最近写入：\n");
            for command in recent.iter() {
                prompt.push_str(&command.to_string());
                prompt.push('\n');
            }
        }
        prompt
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<Vec<Command>> {
        let request = CompletionRequest::new(prompt).with_system(system);
        let output = self.provider.complete(&request).await.map_err(|e| match e {
            e @ TianyiError::LlmProvider(_) => e,
            other => TianyiError::LlmProvider(other.to_string()),
        })?;
        Ok(parse_commands(&output))
    }
}

#[async_trait]
impl<P: LlmProvider + 'static> Extractor for CommandExtractor<P> {
    async fn extract_instructions(
        &self,
        event: &MemoryEvent,
        recent_context: &[MemoryEvent],
    ) -> Result<Vec<Instruction>> {
        let prompt = self.writer_prompt(event, recent_context);
        let commands = self.ask(WRITER_PROMPT, prompt).await?;

        let mut instructions = Vec::with_capacity(commands.len());
        for command in commands {
            let command = match command {
                Command::VUpdate { uuid, new_document } => match self.resolve_record_id(&uuid) {
                    Some(id) => Command::VUpdate {
                        uuid: id,
                        new_document,
                    },
                    None => {
                        // Kept as an update so the write fails instead of
                        // creating a record under the short id.
                        warn!(uuid = %uuid, "v_update names no single related memory");
                        Command::VUpdate { uuid, new_document }
                    }
                },
                other => other,
            };
            if matches!(command, Command::VAdd { .. } | Command::VUpdate { .. }) {
                self.remember_write(&command);
            }
            match command.clone().into_instruction() {
                Some(instruction) => instructions.push(instruction),
                None => debug!(?command, "ignoring non-write command during extraction"),
            }
        }
        Ok(instructions)
    }

    fn note_related(&self, records: &[VectorRecord]) {
        *self.related.lock() = records
            .iter()
            .map(|r| (r.id.clone(), r.source_text.clone()))
            .collect();
    }

    async fn resolve_entities(&self, query: &str) -> Result<Vec<String>> {
        let commands = self.ask(SEARCH_PROMPT, format!("用户问题：{}", query)).await?;
        let mut seen = HashSet::new();
        Ok(commands
            .into_iter()
            .filter_map(|c| match c {
                Command::GSearchEntity { entity_name } => Some(entity_name),
                _ => None,
            })
            .filter(|name| seen.insert(name.clone()))
            .collect())
    }
}
