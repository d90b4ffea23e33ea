//! 执行器输出多路分解
//!
//! 执行器回调把事件编码在标准输出里：`ESC[K` 开头，随后是若干段 base64，
//! 每段后跟一个光标左移序列 `ESC[<n>D`，最后以 `ESC[K` 结尾。其余输出
//! 按行切分为 `verbose` 事件。计数器由这里统一分配，严格递增。

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use conductor_core::models::{JobEventKind, HOST_COUNTER_KEYS};
use conductor_domain::events::classify;
use conductor_domain::{EventPayload, ENCRYPTED_PREFIX};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde_json::Value;
use tracing::{debug, warn};

const EVENT_MARKER: &[u8] = b"\x1b[K";

static CURSOR_LEFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[\d+D").unwrap_or_else(|e| panic!("光标序列正则无效: {e}"))
});

/// 把机密值替换为固定标记
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty() && s != ENCRYPTED_PREFIX)
            .collect();
        // 长的先替换，避免前缀相同的短值截断长值
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut result = text.to_string();
        for secret in &self.secrets {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), ENCRYPTED_PREFIX);
            }
        }
        result
    }

    /// 递归替换 JSON 中的字符串值
    pub fn apply_value(&self, value: &mut Value) {
        match value {
            Value::String(text) => {
                let redacted = self.apply(text);
                if redacted != *text {
                    *text = redacted;
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|v| self.apply_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.apply_value(v)),
            _ => {}
        }
    }
}

enum Scan {
    /// 编码段长度（不含首尾标记）
    Complete(usize),
    Incomplete,
    NotEncoded,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn is_encoding_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=' | 0x1b | b'[')
}

/// 标记之后的内容是否构成一个编码段
fn scan_encoded(body: &[u8]) -> Scan {
    for (i, byte) in body.iter().enumerate() {
        if body[i..].starts_with(EVENT_MARKER) {
            return Scan::Complete(i);
        }
        if !is_encoding_byte(*byte) {
            return Scan::NotEncoded;
        }
    }
    Scan::Incomplete
}

/// 缓冲区末尾可能是被截断的标记
fn partial_marker_len(buffer: &[u8]) -> usize {
    (1..EVENT_MARKER.len())
        .rev()
        .find(|len| buffer.ends_with(&EVENT_MARKER[..*len]))
        .unwrap_or(0)
}

fn decode_event(encoded: &[u8]) -> Option<EventPayload> {
    let stripped = CURSOR_LEFT.replace_all(encoded, &b""[..]);
    let raw = STANDARD.decode(stripped.as_ref()).ok()?;
    let payload: EventPayload = serde_json::from_slice(&raw).ok()?;
    if payload.event.is_empty() {
        return None;
    }
    Some(payload)
}

fn count_lines(text: &str) -> i64 {
    text.bytes().filter(|b| *b == b'\n').count() as i64
}

/// 单台主机的结果计数，字段对应 stats 事件中的各项
#[derive(Debug, Clone, Copy, Default)]
struct HostTally {
    ok: i64,
    changed: i64,
    failures: i64,
    dark: i64,
    skipped: i64,
}

impl HostTally {
    fn get(&self, key: &str) -> i64 {
        match key {
            "ok" => self.ok,
            "changed" => self.changed,
            "failures" => self.failures,
            "dark" => self.dark,
            "skipped" => self.skipped,
            "processed" => 1,
            _ => 0,
        }
    }
}

/// 单个作业的输出解析状态
#[derive(Debug, Default)]
pub struct OutputMultiplexer {
    buffer: Vec<u8>,
    pending: Vec<u8>,
    counter: i64,
    line: i64,
    saw_stats: bool,
    tallies: BTreeMap<String, HostTally>,
    redactor: Redactor,
}

impl OutputMultiplexer {
    pub fn new(redactor: Redactor) -> Self {
        Self {
            redactor,
            ..Default::default()
        }
    }

    /// 最近分配的计数器
    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// 已输出的行数
    pub fn lines(&self) -> i64 {
        self.line
    }

    /// 是否出现过 playbook_on_stats
    pub fn saw_stats(&self) -> bool {
        self.saw_stats
    }

    /// 由 worker 自身写入的一段说明文字
    pub fn note(&mut self, text: &str) -> EventPayload {
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.verbose(text.as_bytes())
    }

    /// 追加一段原始输出，返回其中已完整的事件
    pub fn feed(&mut self, data: &[u8]) -> Vec<EventPayload> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            let Some(start) = find(&self.buffer, EVENT_MARKER) else {
                let keep = partial_marker_len(&self.buffer);
                let take = self.buffer.len() - keep;
                self.pending.extend(self.buffer.drain(..take));
                break;
            };
            self.pending.extend(self.buffer.drain(..start));

            let body = &self.buffer[EVENT_MARKER.len()..];
            match scan_encoded(body) {
                Scan::Complete(len) => {
                    let encoded = body[..len].to_vec();
                    let raw: Vec<u8> = self
                        .buffer
                        .drain(..EVENT_MARKER.len() * 2 + len)
                        .collect();
                    match decode_event(&encoded) {
                        Some(payload) => {
                            self.flush_pending(true, &mut out);
                            out.push(self.event(payload));
                        }
                        None => {
                            warn!("无法解析内嵌事件，按普通输出保存 ({} 字节)", raw.len());
                            self.pending.extend(raw);
                        }
                    }
                }
                Scan::NotEncoded => {
                    // 普通的清行序列
                    self.pending.extend(self.buffer.drain(..EVENT_MARKER.len()));
                }
                Scan::Incomplete => break,
            }
        }

        self.flush_pending(false, &mut out);
        out
    }

    /// 执行器没有给出 stats 时，按已见到的主机结果补一个
    ///
    /// 取消中途结束的作业靠它生成主机汇总。已出现过 stats 时返回 `None`。
    pub fn final_stats(&mut self) -> Option<EventPayload> {
        if self.saw_stats {
            return None;
        }
        let mut data = serde_json::Map::new();
        for key in HOST_COUNTER_KEYS {
            let counts: serde_json::Map<String, Value> = self
                .tallies
                .iter()
                .map(|(host, tally)| (host.clone(), Value::from(tally.get(key))))
                .collect();
            data.insert(key.to_string(), Value::Object(counts));
        }

        Some(self.event(EventPayload {
            event: JobEventKind::PlaybookOnStats.as_str().to_string(),
            event_data: Value::Object(data),
            ..Default::default()
        }))
    }

    /// 输出结束，剩余内容全部作为 verbose 事件
    pub fn finish(&mut self) -> Vec<EventPayload> {
        let rest: Vec<u8> = self.buffer.drain(..).collect();
        self.pending.extend(rest);
        let mut out = Vec::new();
        self.flush_pending(true, &mut out);
        out
    }

    /// 输出缓冲的普通文本，非强制时保留最后一个不完整的行
    fn flush_pending(&mut self, all: bool, out: &mut Vec<EventPayload>) {
        let end = if all {
            self.pending.len()
        } else {
            match self.pending.iter().rposition(|b| *b == b'\n') {
                Some(pos) => pos + 1,
                None => return,
            }
        };
        if end == 0 {
            return;
        }
        let text: Vec<u8> = self.pending.drain(..end).collect();
        out.push(self.verbose(&text));
    }

    fn verbose(&mut self, text: &[u8]) -> EventPayload {
        let stdout = self.redactor.apply(&String::from_utf8_lossy(text));
        self.counter += 1;
        let start = self.line;
        self.line += count_lines(&stdout);
        EventPayload::verbose(self.counter, stdout, start, self.line)
    }

    fn tally(&mut self, kind: JobEventKind, payload: &EventPayload) {
        let classified = classify(kind, &payload.event_data);
        let host = payload
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or(classified.host_name);
        if host.is_empty() {
            return;
        }
        let tally = self.tallies.entry(host).or_default();
        match classified.kind {
            JobEventKind::RunnerOnOk | JobEventKind::RunnerOnAsyncOk => {
                tally.ok += 1;
                if classified.changed {
                    tally.changed += 1;
                }
            }
            JobEventKind::RunnerOnSkipped => tally.skipped += 1,
            JobEventKind::RunnerOnUnreachable => tally.dark += 1,
            kind if kind.is_failure() => {
                if classified.failed {
                    tally.failures += 1;
                } else {
                    tally.ok += 1;
                }
            }
            _ => {}
        }
    }

    fn event(&mut self, mut payload: EventPayload) -> EventPayload {
        let stdout = self
            .redactor
            .apply(payload.stdout.as_deref().unwrap_or_default());
        if !self.redactor.is_empty() {
            self.redactor.apply_value(&mut payload.event_data);
        }
        match JobEventKind::parse(&payload.event) {
            Some(JobEventKind::PlaybookOnStats) => self.saw_stats = true,
            Some(kind) if kind.is_runner() => self.tally(kind, &payload),
            _ => {}
        }

        self.counter += 1;
        payload.counter = Some(self.counter);
        payload.start_line = Some(self.line);
        self.line += count_lines(&stdout);
        payload.end_line = Some(self.line);
        payload.stdout = Some(stdout);
        debug!("解析到事件 {} (counter={})", payload.event, self.counter);
        payload
    }
}

/// 按执行器回调的格式编码一个事件
pub fn encode_event(payload: &Value, chunk_size: usize) -> Vec<u8> {
    let encoded = STANDARD.encode(payload.to_string());
    let mut out = EVENT_MARKER.to_vec();
    let chunk_size = chunk_size.max(1);
    for chunk in encoded.as_bytes().chunks(chunk_size) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(format!("\x1b[{}D", chunk.len()).as_bytes());
    }
    out.extend_from_slice(EVENT_MARKER);
    out
}
