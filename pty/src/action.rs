//! The compiled form of a script: MatchActions grouped into MatchContexts.
//!
//! Compilation resolves the lexical settings (`timeout`, `matcher`, `raw`,
//! `cfg.rate`) into each action as it is created, and compiles every match
//! pattern exactly once.

use std::time::Duration;

use regex::bytes::Regex;

use syntax::script::{Action as ScriptAction, MatcherKind, Rate, Stmt};

use crate::term::TtyFlag;

/// Default per-action timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("line {line}: bad match pattern: {source}")]
    BadPattern { line: usize, source: regex::Error },
    #[error("line {line}: unknown tty flag '{flag}'")]
    UnknownFlag { line: usize, flag: String },
}

/// A compiled pattern, ready to search the output buffer.
#[derive(Debug)]
pub enum Matcher {
    Plain(Vec<u8>),
    Regex(Box<Regex>),
}

impl Matcher {
    /// Byte span `[start, end)` of the first match, if any.
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        match self {
            Self::Plain(needle) => {
                if needle.is_empty() {
                    return Some((0, 0));
                }
                haystack
                    .windows(needle.len())
                    .position(|w| w == &needle[..])
                    .map(|start| (start, start + needle.len()))
            }
            Self::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

/// One step of a compiled script.
#[derive(Debug)]
pub struct MatchAction {
    pub kind: ActionKind,
    pub timeout: Duration,
    /// 1-based source line, for diagnostics.
    pub line: usize,
    pub completed: bool,
}

#[derive(Debug)]
pub enum ActionKind {
    Spawn(Vec<String>),
    Match {
        /// Original pattern text, for diagnostics.
        pattern: String,
        matcher: Matcher,
        body: Vec<MatchAction>,
    },
    One(Vec<MatchAction>),
    Eof,
    Write {
        text: String,
        raw: bool,
        rate: Option<Rate>,
    },
    Enqueue { text: String, raw: bool },
    Release,
    Stty { flag: TtyFlag, on: bool },
    Log(Option<String>),
    Hexdump(bool),
    Sleep(Duration),
    Debug(String),
    Exit(i32),
    Fail(Vec<MatchAction>),
}

/// An ordered batch of actions with one processing policy. The driver
/// keeps a stack of these; `one` blocks and match callbacks push new ones.
#[derive(Debug)]
pub struct MatchContext {
    /// Sequential contexts pop from the back, so the actions are stored
    /// reversed. Alternation contexts keep declaration order and use the
    /// per-action `completed` flags instead.
    pub actions: Vec<MatchAction>,
    pub alternation: bool,
}

impl MatchContext {
    pub fn sequential(mut actions: Vec<MatchAction>) -> Self {
        actions.reverse();
        Self {
            actions,
            alternation: false,
        }
    }

    pub fn alternation(actions: Vec<MatchAction>) -> Self {
        Self {
            actions,
            alternation: true,
        }
    }
}

/// Lexical compilation state. Settings statements mutate it; everything
/// else becomes a MatchAction carrying the state current at its position.
pub struct Compiler<'t> {
    source: &'t str,
    timeout: Duration,
    matcher: MatcherKind,
    raw: bool,
    rate: Option<Rate>,
}

impl<'t> Compiler<'t> {
    pub fn new(source: &'t str) -> Self {
        Self {
            source,
            timeout: DEFAULT_TIMEOUT,
            matcher: MatcherKind::Regex,
            raw: false,
            rate: None,
        }
    }

    pub fn compile(&mut self, stmts: &[Stmt<'_>]) -> Result<Vec<MatchAction>, Error> {
        let mut actions = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let line = syntax::line_of(self.source, stmt.token);
            match &stmt.action {
                // settings: consumed here, nothing queued.
                ScriptAction::Timeout(secs) => self.timeout = Duration::from_secs_f64(*secs),
                ScriptAction::Matcher(kind) => self.matcher = *kind,
                ScriptAction::Raw(on) => self.raw = *on,
                ScriptAction::CfgRate(rate) => self.rate = Some(*rate),

                ScriptAction::Spawn(argv) => {
                    actions.push(self.action(ActionKind::Spawn(argv.clone()), line));
                }
                ScriptAction::Match {
                    pattern,
                    matcher,
                    timeout,
                    body,
                } => {
                    let compiled = self.compile_matcher(pattern, *matcher, line)?;
                    let body = self.compile(body)?;
                    let mut action = self.action(
                        ActionKind::Match {
                            pattern: pattern.clone(),
                            matcher: compiled,
                            body,
                        },
                        line,
                    );
                    if let Some(secs) = timeout {
                        action.timeout = Duration::from_secs_f64(*secs);
                    }
                    actions.push(action);
                }
                ScriptAction::One(matches) => {
                    let matches = self.compile(matches)?;
                    actions.push(self.action(ActionKind::One(matches), line));
                }
                ScriptAction::Eof { timeout } => {
                    let mut action = self.action(ActionKind::Eof, line);
                    if let Some(secs) = timeout {
                        action.timeout = Duration::from_secs_f64(*secs);
                    }
                    actions.push(action);
                }
                ScriptAction::Write { text, rate } => {
                    actions.push(self.action(
                        ActionKind::Write {
                            text: text.clone(),
                            raw: self.raw,
                            rate: rate.or(self.rate),
                        },
                        line,
                    ));
                }
                ScriptAction::Enqueue(text) => {
                    actions.push(self.action(
                        ActionKind::Enqueue {
                            text: text.clone(),
                            raw: self.raw,
                        },
                        line,
                    ));
                }
                ScriptAction::Release => actions.push(self.action(ActionKind::Release, line)),
                ScriptAction::Stty { flag, on } => {
                    let flag = TtyFlag::from_name(flag).ok_or_else(|| Error::UnknownFlag {
                        line,
                        flag: (*flag).to_owned(),
                    })?;
                    actions.push(self.action(ActionKind::Stty { flag, on: *on }, line));
                }
                ScriptAction::Log(path) => {
                    actions.push(self.action(ActionKind::Log(path.clone()), line));
                }
                ScriptAction::Hexdump(on) => {
                    actions.push(self.action(ActionKind::Hexdump(*on), line));
                }
                ScriptAction::Sleep(secs) => {
                    actions.push(self.action(ActionKind::Sleep(Duration::from_secs_f64(*secs)), line));
                }
                ScriptAction::Debug(msg) => {
                    actions.push(self.action(ActionKind::Debug(msg.clone()), line));
                }
                ScriptAction::Exit(code) => {
                    actions.push(self.action(ActionKind::Exit(code.unwrap_or(0)), line));
                }
                ScriptAction::Fail(body) => {
                    let body = self.compile(body)?;
                    actions.push(self.action(ActionKind::Fail(body), line));
                }
            }
        }
        Ok(actions)
    }

    fn compile_matcher(
        &self,
        pattern: &str,
        kind: Option<MatcherKind>,
        line: usize,
    ) -> Result<Matcher, Error> {
        match kind.unwrap_or(self.matcher) {
            MatcherKind::Plain => Ok(Matcher::Plain(pattern.as_bytes().to_vec())),
            MatcherKind::Regex => Regex::new(pattern)
                .map(|re| Matcher::Regex(Box::new(re)))
                .map_err(|source| Error::BadPattern { line, source }),
        }
    }

    fn action(&self, kind: ActionKind, line: usize) -> MatchAction {
        MatchAction {
            kind,
            timeout: self.timeout,
            line,
            completed: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compile(text: &str) -> Vec<MatchAction> {
        let stmts = syntax::parse_script(text).unwrap();
        Compiler::new(text).compile(&stmts).unwrap()
    }

    #[test]
    fn test_matcher_find() {
        let m = Matcher::Plain(b"world".to_vec());
        assert_eq!(Some((6, 11)), m.find(b"hello world!"));
        assert_eq!(None, m.find(b"nothing here"));

        let m = Matcher::Regex(Box::new(Regex::new("w.rld").unwrap()));
        assert_eq!(Some((6, 11)), m.find(b"hello world!"));
    }

    #[test]
    fn test_settings_inherit_lexically() {
        let actions = compile("match \"a\"\ntimeout 3\nmatch \"b\"\nmatch \"c\" timeout 1");
        assert_eq!(DEFAULT_TIMEOUT, actions[0].timeout);
        assert_eq!(Duration::from_secs(3), actions[1].timeout);
        assert_eq!(Duration::from_secs(1), actions[2].timeout);
        assert_eq!(3, actions.len(), "timeout statement queues nothing");
    }

    #[test]
    fn test_raw_and_rate_baked_into_writes(){
        let actions = compile("write \"a\"\nraw on\ncfg { rate 4 0.5 }\nwrite \"b\"");
        assert!(matches!(&actions[0].kind, ActionKind::Write { raw: false, rate: None, .. }));
        assert!(
            matches!(&actions[1].kind, ActionKind::Write { raw: true, rate: Some(r), .. } if r.bytes == 4)
        );
    }

    #[test]
    fn test_bad_regex_names_line() {
        let text = "match \"ok\"\nmatch \"(unclosed\"";
        let stmts = syntax::parse_script(text).unwrap();
        let err = Compiler::new(text).compile(&stmts).unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn test_unknown_stty_flag() {
        let text = "stty vtime on";
        let stmts = syntax::parse_script(text).unwrap();
        let err = Compiler::new(text).compile(&stmts).unwrap_err();
        assert!(err.to_string().contains("unknown tty flag 'vtime'"));
    }

    #[test]
    fn test_sequential_context_pops_in_order() {
        let actions = compile("debug \"one\"\ndebug \"two\"");
        let mut ctx = MatchContext::sequential(actions);
        match ctx.actions.pop().map(|a| a.kind) {
            Some(ActionKind::Debug(msg)) => assert_eq!("one", msg),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
