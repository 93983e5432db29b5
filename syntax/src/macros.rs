//! Shims that pin down the `combine::parser!` boilerplate used by every
//! parser in this crate.
//!
//! The where-clauses below are imposed wholesale by combine: a named
//! parser function over a borrowed-text `RangeStream` has to restate the
//! stream, token, and error bounds on every declaration, and the numeric
//! parsers additionally need the stream error to absorb `std::num` parse
//! failures (`and_then`-based number parsing). These macros keep that
//! incantation out of the grammar modules; their bodies are the standard
//! combine recipe, carried over from prior use rather than invented here,
//! with nothing domain-specific to adapt.

/// A named parser function returning `$ret` over a `&str` range stream.
macro_rules! p {
    ($name:ident( $($arg: ident :  $arg_type: ty),* ) -> $ret:ty, $code:expr) => {
        combine::parser!{
            pub fn $name['a, I]($($arg : $arg_type),*)(I) -> $ret
                where
                [I: combine::stream::RangeStream<
                 Range = &'a str,
                 Token = char>,
                 I::Error: combine::ParseError<char, &'a str, <I as combine::stream::StreamOnce>::Position>,
                 <I::Error as combine::ParseError<char, &'a str, <I as combine::stream::StreamOnce>::Position>>::StreamError:
                 From<std::num::ParseIntError> +
                 From<std::num::ParseFloatError>
            ]            {
                $code
            }
        }
    };
}

/// Like [`p!`], but for combinators that wrap another parser `P`.
macro_rules! wrapper {
    ($name:ident($delegate: ident), $code:expr) => {
        combine::parser!{
            pub fn $name['a, I, P]($delegate: P)(I) -> P::Output
                where
                [I: combine::stream::RangeStream<
                 Range = &'a str,
                 Token = char>,
                 I::Error: combine::ParseError<char, &'a str, <I as combine::stream::StreamOnce>::Position>,
                 <I::Error as combine::ParseError<char, &'a str, <I as combine::stream::StreamOnce>::Position>>::StreamError:
                 From<std::num::ParseIntError> +
                 From<std::num::ParseFloatError>,
                 P: combine::Parser<I>,
            ]            {
                $code
            }
        }
    };
}
