//! AST and parser for PTY driver scripts.
//!
//! A script is a flat sequence of statements; `match` bodies, `one` blocks
//! and `fail` blocks nest further statements. Each parsed statement keeps a
//! borrowed slice of its keyword so embedders can recover the source line
//! (see [`crate::line_of`]) for diagnostics.

use anyhow::Result;

use crate::parse::prelude::*;
use crate::parse::util::{braces, ident, integer, kw, lex, whitespace};

/// How a `match` pattern is applied to the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// Byte-for-byte substring search.
    Plain,
    /// Regular expression, compiled once per action.
    Regex,
}

/// A write rate limit: at most `bytes` per chunk, `delay` seconds between chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub bytes: usize,
    pub delay: f64,
}

/// One script statement.
#[derive(Debug, PartialEq)]
pub enum Action<'a> {
    /// Spawn the child process on a fresh pty.
    Spawn(Vec<String>),
    /// Consume buffer output until the pattern matches.
    Match {
        pattern: String,
        matcher: Option<MatcherKind>,
        timeout: Option<f64>,
        /// Statements queued as a new context when the match succeeds.
        body: Vec<Stmt<'a>>,
    },
    /// Alternation: wait until any contained match succeeds.
    One(Vec<Stmt<'a>>),
    /// Wait for the child to reach EOF.
    Eof { timeout: Option<f64> },
    /// Write to the child, with optional per-action rate limit.
    Write { text: String, rate: Option<Rate> },
    /// Buffer bytes to be written right after the child is released.
    Enqueue(String),
    /// Release the child explicitly.
    Release,
    /// Toggle a termios flag in the child via the IPC exchange.
    Stty { flag: &'a str, on: bool },
    /// Toggle `^X` control-character translation in writes.
    Raw(bool),
    /// Process-wide write rate limit.
    CfgRate(Rate),
    /// Default timeout for actions created after this point.
    Timeout(f64),
    /// Default matcher for match actions created after this point.
    Matcher(MatcherKind),
    /// Tee child output to a file; `None` stops logging.
    Log(Option<String>),
    /// Hex-dump the buffer on match failure.
    Hexdump(bool),
    Sleep(f64),
    /// Print a note to stderr when the action is processed.
    Debug(String),
    /// Stop the script immediately with the given status.
    Exit(Option<i32>),
    /// Install the failure callback; its statements run once on the
    /// first subsequent match failure.
    Fail(Vec<Stmt<'a>>),
}

/// An [`Action`] plus the source slice of its keyword.
#[derive(Debug, PartialEq)]
pub struct Stmt<'a> {
    pub action: Action<'a>,
    pub token: &'a str,
}

/// Parse the text of a driver script.
/// A leading `#!` line needs no special handling: `#` starts a comment.
pub fn parse_script(text: &str) -> Result<Vec<Stmt<'_>>> {
    use combine::EasyParser;
    script()
        .easy_parse(text)
        .map(|(stmts, _)| stmts)
        .map_err(|e| crate::parse::translate_error(e, text))
}

p! {
    number() -> f64, {
        recognize(
            skip_many1(one_of("0123456789".chars()))
            .and(optional(char('.').and(skip_many1(one_of("0123456789".chars())))))
        )
        .and_then(|s: &'a str| s.parse::<f64>())
    }
}

// One fragment of a quoted string. Standard backslash escapes are resolved
// here; `\^` is passed through intact so the driver can distinguish a
// literal caret from a control-character prefix.
p! {
    string_piece() -> String, {
        char('\\').with(any()).map(|c| match c {
            'n' => String::from("\n"),
            't' => String::from("\t"),
            'r' => String::from("\r"),
            '^' => String::from("\\^"),
            other => other.to_string(),
        })
        .or(recognize(skip_many1(none_of("\"\\".chars()))).map(str::to_string))
    }
}

p! {
    qstring() -> String, {
        char('"')
        .with(many::<Vec<String>, _, _>(string_piece()))
        .skip(char('"'))
        .map(|pieces| pieces.concat())
    }
}

p! {
    on_off() -> bool, {
        attempt(kw("on")).map(|_| true).or(attempt(kw("off")).map(|_| false))
    }
}

p! {
    matcher_kind() -> MatcherKind, {
        attempt(kw("plain")).map(|_| MatcherKind::Plain)
            .or(attempt(kw("regex")).map(|_| MatcherKind::Regex))
    }
}

p! {
    rate() -> Rate, {
        integer().skip(optional(whitespace())).and(number())
            .map(|(bytes, delay)| Rate { bytes: bytes.max(1) as usize, delay })
    }
}

p! {
    match_stmt() -> Stmt<'a>, {
        attempt(kw("match"))
            .and(lex(qstring()))
            .and(optional(attempt(kw("matcher")).with(lex(matcher_kind()))))
            .and(optional(attempt(kw("timeout")).with(lex(number()))))
            .and(optional(attempt(braces(stmts()))))
            .map(|((((token, pattern), matcher), timeout), body)| Stmt {
                token,
                action: Action::Match {
                    pattern,
                    matcher,
                    timeout,
                    body: body.unwrap_or_default(),
                },
            })
    }
}

p! {
    stmt() -> Stmt<'a>, {
        choice!(
            match_stmt(),
            attempt(kw("one"))
                .and(braces(many1::<Vec<_>, _, _>(
                    match_stmt().skip(optional(whitespace()))
                )))
                .map(|(token, matches)| Stmt { token, action: Action::One(matches) }),
            attempt(kw("eof"))
                .and(optional(attempt(kw("timeout")).with(lex(number()))))
                .map(|(token, timeout)| Stmt { token, action: Action::Eof { timeout } }),
            attempt(kw("write"))
                .and(lex(qstring()))
                .and(optional(attempt(kw("rate")).with(lex(rate()))))
                .map(|((token, text), rate)| Stmt { token, action: Action::Write { text, rate } }),
            attempt(kw("enqueue"))
                .and(lex(qstring()))
                .map(|(token, text)| Stmt { token, action: Action::Enqueue(text) }),
            attempt(kw("spawn"))
                .and(many1::<Vec<String>, _, _>(lex(qstring())))
                .map(|(token, argv)| Stmt { token, action: Action::Spawn(argv) }),
            attempt(kw("release"))
                .map(|token| Stmt { token, action: Action::Release }),
            attempt(kw("stty"))
                .and(lex(ident()))
                .and(lex(on_off()))
                .map(|((token, flag), on)| Stmt { token, action: Action::Stty { flag, on } }),
            attempt(kw("raw"))
                .and(lex(on_off()))
                .map(|(token, on)| Stmt { token, action: Action::Raw(on) }),
            attempt(kw("cfg"))
                .and(braces(attempt(kw("rate")).with(lex(rate()))))
                .map(|(token, rate)| Stmt { token, action: Action::CfgRate(rate) }),
            attempt(kw("timeout"))
                .and(lex(number()))
                .map(|(token, secs)| Stmt { token, action: Action::Timeout(secs) }),
            attempt(kw("matcher"))
                .and(lex(matcher_kind()))
                .map(|(token, kind)| Stmt { token, action: Action::Matcher(kind) }),
            attempt(kw("log"))
                .and(lex(attempt(qstring()).map(Some).or(attempt(kw("off")).map(|_| None))))
                .map(|(token, path)| Stmt { token, action: Action::Log(path) }),
            attempt(kw("hexdump"))
                .and(lex(on_off()))
                .map(|(token, on)| Stmt { token, action: Action::Hexdump(on) }),
            attempt(kw("sleep"))
                .and(lex(number()))
                .map(|(token, secs)| Stmt { token, action: Action::Sleep(secs) }),
            attempt(kw("debug"))
                .and(lex(qstring()))
                .map(|(token, msg)| Stmt { token, action: Action::Debug(msg) }),
            attempt(kw("exit"))
                .and(optional(attempt(lex(integer()))))
                .map(|(token, code)| Stmt { token, action: Action::Exit(code.map(|c| c as i32)) }),
            attempt(kw("fail"))
                .and(braces(stmts()))
                .map(|(token, body)| Stmt { token, action: Action::Fail(body) })
        )
    }
}

// repetitions skip their own trailing whitespace; see the note in parse.rs.
p! {
    stmts() -> Vec<Stmt<'a>>, {
        many(stmt().skip(optional(whitespace())))
    }
}

p! {
    script() -> Vec<Stmt<'a>>, {
        optional(whitespace()).with(stmts()).skip(eof())
    }
}

#[cfg(test)]
mod test {
    use super::{Action, MatcherKind, Rate};

    #[test]
    fn test_basic_script() {
        let text = "#!/usr/bin/env tinker\nspawn \"cat\"\nwrite \"hello\\n\"\nmatch \"hello\"\n";
        let stmts = super::parse_script(text).unwrap();
        assert_eq!(3, stmts.len());
        assert_eq!(Action::Spawn(vec![String::from("cat")]), stmts[0].action);
        assert!(matches!(&stmts[1].action, Action::Write { text, rate: None } if text == "hello\n"));
        assert_eq!(2, crate::line_of(text, stmts[0].token));
        assert_eq!(4, crate::line_of(text, stmts[2].token));
    }

    #[test]
    fn test_match_options_and_body() {
        let text = r#"
match "login:" matcher plain timeout 2.5 {
    write "root\n"
}
"#;
        let stmts = super::parse_script(text).unwrap();
        match &stmts[0].action {
            Action::Match { pattern, matcher, timeout, body } => {
                assert_eq!("login:", pattern);
                assert_eq!(Some(MatcherKind::Plain), *matcher);
                assert_eq!(Some(2.5), *timeout);
                assert_eq!(1, body.len());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_one_rejects_non_match() {
        assert!(super::parse_script("one { match \"a\" match \"b\" }").is_ok());
        assert!(super::parse_script("one { write \"a\" }").is_err());
    }

    #[test]
    fn test_fail_and_exit() {
        let stmts = super::parse_script("fail { debug \"boom\" exit 3 }").unwrap();
        match &stmts[0].action {
            Action::Fail(body) => {
                assert!(matches!(&body[0].action, Action::Debug(_)));
                assert!(matches!(&body[1].action, Action::Exit(Some(3))));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_cfg_rate_and_toggles() {
        let stmts =
            super::parse_script("cfg { rate 16 0.25 }\nraw on\nstty echo off\nhexdump on").unwrap();
        assert_eq!(
            Action::CfgRate(Rate { bytes: 16, delay: 0.25 }),
            stmts[0].action
        );
        assert_eq!(Action::Raw(true), stmts[1].action);
        assert_eq!(Action::Stty { flag: "echo", on: false }, stmts[2].action);
    }

    #[test]
    fn test_caret_escape_passthrough() {
        let stmts = super::parse_script(r#"write "a\^b^C""#).unwrap();
        assert!(matches!(&stmts[0].action, Action::Write { text, .. } if text == "a\\^b^C"));
    }
}
