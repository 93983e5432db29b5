use anyhow::Result;

use crate::ast;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ParseError on line '{line}': {msg}")]
    Syntax { msg: String, pos: usize, line: String },
    #[error("Duplicate '{0}' declaration")]
    Duplicate(&'static str),
}

/// Parse the text of one `.task` file.
pub fn parse_task(text: &str) -> Result<ast::TaskFile<'_>> {
    use combine::EasyParser;
    let (items, _) = taskfile::items()
        .easy_parse(text)
        .map_err(|e| translate_error(e, text))?;

    let mut file = ast::TaskFile::default();
    for item in items {
        use taskfile::Item::*;
        match item {
            Descr(d) => {
                if file.descr.replace(d).is_some() {
                    return Err(Error::Duplicate("descr").into());
                }
            }
            Params(mut p) => file.params.append(&mut p),
            Inputs(mut i) => file.inputs.append(&mut i),
            Outputs(mut o) => file.outputs.append(&mut o),
            Run(code) => {
                if file.code.replace(code).is_some() {
                    return Err(Error::Duplicate("run").into());
                }
            }
        }
    }
    Ok(file)
}

/// Stringify a combine error, isolating the offending line.
/// Converting combine's errors directly is a lifetime nightmare,
/// so we lose the structure and keep the message.
pub(crate) fn translate_error<'a>(
    e: combine::easy::Errors<char, &'a str, combine::stream::PointerOffset<str>>,
    text: &'a str,
) -> anyhow::Error {
    let pos = e.position.translate_position(text);
    let before = &text[0..pos];
    let after = &text[pos..text.len()];
    let prefix: String = before.chars().rev().take_while(|&c| c != '\n').collect();
    let prefix: String = prefix.chars().rev().collect();
    let suffix: String = after.chars().take_while(|&c| c != '\n').collect();
    Error::Syntax {
        pos,
        line: prefix + &suffix,
        msg: format!("{}", e),
    }
    .into()
}

pub mod prelude {
    pub use combine::parser::char::{char, string};
    pub use combine::parser::range::{recognize, recognize_with_value};
    pub use combine::*;
}

pub mod util {

    use super::prelude::*;
    use combine::parser::char::{alpha_num, letter, space};

    p! {
        ident_start() -> char, {
            char('_').or(letter())
        }
    }

    p! {
        ident_rest() -> Vec<char>, {
            many(char('_').or(char('-')).or(alpha_num()))
        }
    }

    p! {
        ident() -> &'a str, {
            recognize(ident_start().and(ident_rest()))
        }
    }

    // a slash-separated task name, e.g. example/hello-world
    p! {
        task_path() -> &'a str, {
            recognize(ident().and(skip_many(char('/').and(ident()))))
        }
    }

    // runs to end of line; the newline itself is left for whitespace()
    p! {
        comment() -> &'a str, {
            recognize(char('#').and(skip_many(none_of("\n".chars()))))
        }
    }

    p! {
        whitespace() -> (), {
            skip_many1(
                space().map(|_| ()).or(comment().map(|_| ()))
            )
        }
    }

    wrapper! {
        lex(parser), {
            optional(whitespace()).with(parser).skip(optional(whitespace()))
        }
    }

    wrapper! {
        braces(parser), {
            lex(char('{')).with(parser).skip(lex(char('}')))
        }
    }

    wrapper! {
        brackets(parser), {
            lex(char('[')).with(parser).skip(lex(char(']')))
        }
    }

    // keyword: name not followed by more identifier characters.
    // Returns the matched slice of the input so callers can recover
    // source positions from it.
    // (combine's parser! macro hands arguments over by reference.)
    p! {
        kw(name: &'static str) -> &'a str, {
            recognize(
                string(*name)
                .skip(not_followed_by(alpha_num().or(char('_')).or(char('-'))))
            )
        }
    }

    p! {
        quoted() -> &'a str, {
            char('"')
            .with(recognize(skip_many(none_of("\"".chars()))))
            .skip(char('"'))
        }
    }

    p! {
        integer() -> i64, {
            recognize(optional(char('-')).and(skip_many1(one_of("0123456789".chars()))))
                .and_then(|s: &'a str| s.parse::<i64>())
        }
    }

    #[cfg(test)]
    mod test {
        use combine::EasyParser;

        #[test]
        fn test_ident() {
            assert_eq!("my_name", super::ident().easy_parse("my_name").unwrap().0);
            assert_eq!("a-b2", super::ident().easy_parse("a-b2").unwrap().0);
            assert!(super::ident().easy_parse("2name").is_err());
        }

        #[test]
        fn test_task_path() {
            assert_eq!(
                "example/hello-world",
                super::task_path().easy_parse("example/hello-world").unwrap().0
            );
        }

        #[test]
        fn test_kw() {
            assert_eq!("run", super::kw("run").easy_parse("run {").unwrap().0);
            assert!(super::kw("run").easy_parse("runs").is_err());
        }

        #[test]
        fn test_comment_then_whitespace() {
            assert_eq!(
                ((), "x"),
                super::whitespace().easy_parse("# note\n  x").unwrap()
            );
            assert_eq!(((), ""), super::whitespace().easy_parse("# eof comment").unwrap());
        }

        #[test]
        fn test_integer() {
            assert_eq!(42, super::integer().easy_parse("42").unwrap().0);
            assert_eq!(-7, super::integer().easy_parse("-7").unwrap().0);
        }
    }
}

mod literal {

    use super::prelude::*;
    use super::util::{integer, kw, quoted};
    use crate::ast::Literal;

    p! {
        literal() -> Literal<'a>, {
            choice!(
                quoted().map(Literal::Str),
                attempt(kw("true")).map(|_| Literal::Bool(true)),
                attempt(kw("false")).map(|_| Literal::Bool(false)),
                integer().map(Literal::Int)
            )
        }
    }

    #[cfg(test)]
    mod test {
        use crate::ast::Literal;
        use combine::EasyParser;

        #[test]
        fn test_literal() {
            assert_eq!(
                Literal::Str("hi"),
                super::literal().easy_parse("\"hi\"").unwrap().0
            );
            assert_eq!(Literal::Bool(true), super::literal().easy_parse("true").unwrap().0);
            assert_eq!(Literal::Int(10), super::literal().easy_parse("10").unwrap().0);
        }
    }
}

pub(crate) mod bash {
    //! Parsers for capturing the bash code contained in run blocks.
    //! The block ends at the first brace that doesn't balance, so we have
    //! to track nesting through quotes, comments, and substitutions.

    use super::prelude::*;
    use super::util::{comment, ident};

    fn no_vars(s: &str) -> (&str, Vec<&str>) {
        (s, Vec::with_capacity(0))
    }

    fn full_text_and_vars<'a>(
        (full_text, (_, parsed_vars)): (&'a str, (&'a str, Vec<&'a str>)),
    ) -> (&'a str, Vec<&'a str>) {
        (full_text, parsed_vars)
    }

    p! {
        escaped_char() -> &'a str, {
            recognize(char('\\').and(any()))
        }
    }

    p! {
        single_quoted_string() -> &'a str, {
            recognize(
                char('\'').and(skip_many(none_of("'".chars()))).and(char('\''))
            )
        }
    }

    // inside double quotes only $vars and escapes are special.
    p! {
        double_quoted_content() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                skip_many(none_of("$\"\\".chars()))
                    .with(optional(
                        choice!(
                            variable_like(),
                            escaped_char().map(no_vars)
                        )
                        .and(double_quoted_content())
                    ))
            ).map(|(full_text, parsed_suffix)| {
                let mut vars = Vec::new();
                if let Some(((_, mut special_vars), (_, mut rest_vars))) = parsed_suffix {
                    vars.append(&mut special_vars);
                    vars.append(&mut rest_vars);
                }
                (full_text, vars)
            })
        }
    }

    p! {
        double_quoted_string() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                char('"').with(double_quoted_content()).skip(char('"'))
            ).map(full_text_and_vars)
        }
    }

    // $?, $#, positional args and friends: not task variables.
    p! {
        internal_variable() -> &'a str, {
            recognize(
                char('$').and(one_of("*@#?-$!0123456789_".chars()))
            )
        }
    }

    p! {
        simple_variable() -> (&'a str, &'a str), {
            recognize(char('$').and(ident()))
                .map(|var: &'a str| (var, &var[1..]))
        }
    }

    p! {
        braced_variable() -> (&'a str, &'a str), {
            recognize(char('$').and(char('{')).and(ident()).and(char('}')))
                .map(|var: &'a str| {
                    let len = var.len();
                    (var, &var[2..len - 1])
                })
        }
    }

    // ${var%%glob} and other manipulations; don't try to find vars inside.
    p! {
        string_manipulation() -> &'a str, {
            recognize(
                char('$').and(char('{')).and(skip_many1(none_of("}".chars()))).and(char('}'))
            )
        }
    }

    p! {
        command_sub() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                char('$').and(char('(')).with(bash_block()).skip(char(')'))
            ).map(full_text_and_vars)
        }
    }

    p! {
        parens_section() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                char('(').with(bash_block()).skip(char(')'))
            ).map(full_text_and_vars)
        }
    }

    p! {
        braces_section() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                char('{').with(bash_block()).skip(char('}'))
            ).map(full_text_and_vars)
        }
    }

    p! {
        variable_like() -> (&'a str, Vec<&'a str>), {
            choice!(
                attempt(internal_variable().map(no_vars)),
                attempt(command_sub()),
                attempt(braced_variable().map(|(s, v)| (s, vec![v]))),
                attempt(simple_variable().map(|(s, v)| (s, vec![v]))),
                attempt(string_manipulation().map(no_vars)),
                recognize(char('$')).map(no_vars)
            )
        }
    }

    // any chunk of text we can be sure won't have variables or nesting in it.
    p! {
        code_blob() -> &'a str, {
            recognize(
                skip_many(none_of("{}()\"'#$\\".chars()))
            )
        }
    }

    p! {
        non_blob_element() -> (&'a str, Vec<&'a str>), {
            choice!(
                escaped_char().map(no_vars),
                variable_like(),
                parens_section(),
                braces_section(),
                single_quoted_string().map(no_vars),
                double_quoted_string(),
                comment().map(no_vars)
            )
        }
    }

    p! {
        bash_block() -> (&'a str, Vec<&'a str>), {
            recognize_with_value(
                code_blob().with(optional(non_blob_element().and(bash_block())))
            ).map(|(full_text, parsed_suffix)| {
                let mut vars = Vec::new();
                if let Some(((_, mut elem_vars), (_, mut suffix_vars))) = parsed_suffix {
                    vars.append(&mut elem_vars);
                    vars.append(&mut suffix_vars);
                }
                (full_text, vars)
            })
        }
    }

    p! {
        bash_code() -> crate::ast::BashCode<'a>, {
            bash_block().map(|(text, vars)| crate::ast::BashCode { text, vars })
        }
    }

    #[cfg(test)]
    mod test {
        use combine::EasyParser;

        #[test]
        fn test_vars() {
            let (code, _) = super::bash_code()
                .easy_parse("echo \"Hello, ${addressee}!\" > $greeting/out.txt")
                .unwrap();
            assert_eq!(vec!["addressee", "greeting"], code.vars);
        }

        #[test]
        fn test_stops_at_unbalanced_brace() {
            let (code, rest) = super::bash_code()
                .easy_parse("if true; then { echo hi; }; fi }")
                .unwrap();
            assert_eq!("if true; then { echo hi; }; fi ", code.text);
            assert_eq!("}", rest);
        }

        #[test]
        fn test_quoted_braces_ignored() {
            let (code, rest) = super::bash_code().easy_parse("echo '}' \"}\"}").unwrap();
            assert_eq!("echo '}' \"}\"", code.text);
            assert_eq!("}", rest);
        }
    }
}

mod taskfile {

    use super::literal::literal;
    use super::prelude::*;
    use super::util::{braces, brackets, ident, kw, lex, quoted, task_path, whitespace};
    use crate::ast;

    /// One top-level declaration in a `.task` file.
    pub enum Item<'a> {
        Descr(&'a str),
        Params(Vec<ast::ParamSpec<'a>>),
        Inputs(Vec<ast::InputSpec<'a>>),
        Outputs(Vec<ast::OutputSpec<'a>>),
        Run(ast::BashCode<'a>),
    }

    enum ParamField<'a> {
        Descr(&'a str),
        Default(ast::Literal<'a>),
        Required,
        Valid(ast::ValidSpec<'a>),
    }

    p! {
        valid_spec() -> ast::ValidSpec<'a>, {
            choice!(
                brackets(sep_by1(lex(literal()), char(','))).map(ast::ValidSpec::OneOf),
                attempt(kw("matches")).with(lex(quoted())).map(ast::ValidSpec::Matches)
            )
        }
    }

    p! {
        param_field() -> ParamField<'a>, {
            choice!(
                attempt(kw("descr")).with(lex(quoted())).map(ParamField::Descr),
                attempt(kw("default")).with(lex(literal())).map(ParamField::Default),
                attempt(kw("required")).map(|_| ParamField::Required),
                attempt(kw("valid")).with(lex(valid_spec())).map(ParamField::Valid)
            )
        }
    }

    // NB repetitions skip trailing whitespace themselves: wrapping the
    // repeated parser in lex() would make it consume leading whitespace
    // before failing at the closing brace, which many() treats as an error.
    p! {
        param_block() -> ast::ParamSpec<'a>, {
            lex(ident()).and(braces(many::<Vec<_>, _, _>(
                param_field().skip(optional(whitespace()))
            )))
                .map(|(name, fields)| {
                    let mut spec = ast::ParamSpec {
                        name,
                        descr: None,
                        default: None,
                        required: false,
                        valid: None,
                    };
                    for field in fields {
                        match field {
                            ParamField::Descr(d) => spec.descr = Some(d),
                            ParamField::Default(v) => spec.default = Some(v),
                            ParamField::Required => spec.required = true,
                            ParamField::Valid(v) => spec.valid = Some(v),
                        }
                    }
                    spec
                })
        }
    }

    p! {
        override_rhs() -> ast::OverrideRhs<'a>, {
            char('$').with(ident()).map(ast::OverrideRhs::FromParent)
                .or(literal().map(ast::OverrideRhs::Literal))
        }
    }

    p! {
        input_override() -> (&'a str, ast::OverrideRhs<'a>), {
            lex(ident()).skip(lex(char('='))).and(lex(override_rhs()))
        }
    }

    p! {
        input_spec() -> ast::InputSpec<'a>, {
            lex(ident())
                .skip(lex(char(':')))
                .and(lex(task_path()))
                .and(optional(attempt(braces(many::<Vec<_>, _, _>(
                    input_override().skip(optional(whitespace()))
                )))))
                .map(|((alias, task), overrides)| ast::InputSpec {
                    alias,
                    task,
                    overrides: overrides.unwrap_or_default(),
                })
        }
    }

    p! {
        output_spec() -> ast::OutputSpec<'a>, {
            lex(ident()).and(optional(attempt(lex(quoted()))))
                .map(|(name, descr)| ast::OutputSpec { name, descr })
        }
    }

    p! {
        item() -> Item<'a>, {
            choice!(
                attempt(kw("descr")).with(lex(quoted())).map(Item::Descr),
                attempt(kw("params"))
                    .with(braces(many(param_block().skip(optional(whitespace())))))
                    .map(Item::Params),
                attempt(kw("inputs"))
                    .with(braces(many(input_spec().skip(optional(whitespace())))))
                    .map(Item::Inputs),
                attempt(kw("outputs"))
                    .with(braces(many(output_spec().skip(optional(whitespace())))))
                    .map(Item::Outputs),
                attempt(kw("run"))
                    .with(lex(char('{')))
                    .with(super::bash::bash_code())
                    .skip(char('}'))
                    .map(Item::Run)
            )
        }
    }

    p! {
        items() -> Vec<Item<'a>>, {
            optional(whitespace())
                .with(many(item().skip(optional(whitespace()))))
                .skip(eof())
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ast::{Literal, OverrideRhs, ValidSpec};

    const HELLO: &str = r#"
descr "Greet the addressee"

params {
    addressee {
        descr "Who to greet"
        default "world"
    }
    msg2 {
        valid ["hello", "goodbye"]
        default "hello"
    }
}

run {
    echo "Hello, ${addressee}!"
}
"#;

    #[test]
    fn test_parse_hello() {
        let file = super::parse_task(HELLO).unwrap();
        assert_eq!(Some("Greet the addressee"), file.descr);
        assert_eq!(2, file.params.len());
        assert_eq!("addressee", file.params[0].name);
        assert_eq!(Some(Literal::Str("world")), file.params[0].default);
        assert_eq!(
            Some(ValidSpec::OneOf(vec![
                Literal::Str("hello"),
                Literal::Str("goodbye")
            ])),
            file.params[1].valid
        );
        let code = file.code.unwrap();
        assert!(code.text.contains("echo \"Hello, ${addressee}!\""));
        assert_eq!(vec!["addressee"], code.vars);
    }

    #[test]
    fn test_parse_inputs() {
        let text = r#"
inputs {
    hello: example/hello-world {
        addressee = "friend"
        msg = $own_msg
    }
    plain: example/other
}

run {
    echo "Goodbye!"
}
"#;
        let file = super::parse_task(text).unwrap();
        assert_eq!(2, file.inputs.len());
        assert_eq!("hello", file.inputs[0].alias);
        assert_eq!("example/hello-world", file.inputs[0].task);
        assert_eq!("addressee", file.inputs[0].overrides[0].0);
        assert!(matches!(
            &file.inputs[0].overrides[0].1,
            OverrideRhs::Literal(Literal::Str("friend"))
        ));
        assert!(matches!(
            &file.inputs[0].overrides[1].1,
            OverrideRhs::FromParent("own_msg")
        ));
        assert!(file.inputs[1].overrides.is_empty());
    }

    #[test]
    fn test_required_and_outputs() {
        let text = r#"
params {
    url { required }
}

outputs {
    repo "The cloned repository"
    scratch
}

run {
    git clone "$url" "$repo"
}
"#;
        let file = super::parse_task(text).unwrap();
        assert!(file.params[0].required);
        assert_eq!("repo", file.outputs[0].name);
        assert_eq!(Some("The cloned repository"), file.outputs[0].descr);
        assert_eq!(None, file.outputs[1].descr);
    }

    #[test]
    fn test_duplicate_run_fails() {
        let text = "run { echo a }\nrun { echo b }\n";
        assert!(super::parse_task(text).is_err());
    }

    #[test]
    fn test_garbage_fails() {
        assert!(super::parse_task("params { 2bad { } }").is_err());
    }
}
