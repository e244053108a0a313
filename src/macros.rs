//! Macros Used Throughout the Library

/// Convenience macro to build a [`crate::cmd::Command`] from a keyword and
/// any number of binary-safe arguments
///
/// ```
/// use redis_pipeline_client::cmd;
///
/// let command = cmd!("SET", "key", "value");
/// assert_eq!(b"SET", command.name());
/// ```
#[macro_export]
macro_rules! cmd {
    ($name:expr $(, $arg:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut command = $crate::cmd::Command::new($name);
        $(
            command = command.arg($arg);
        )*
        command
    }};
}

/// Compares against an enum variant without taking the value into account
#[macro_export]
macro_rules! is_enum_variant {
    ($val:ident, $var:path) => {
        match $val {
            $var(..) => true,
            _ => false,
        }
    };
}
