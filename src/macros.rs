#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        if std::env::var_os("REMOLD_DEBUG").is_some() {
            eprintln!($($arg)*);
        }
    };
}

/// Build a sequence value: `vseq!(TypeSpec::Str; "a", "b")`.
#[macro_export]
macro_rules! vseq {
    ($elem:expr) => {
        $crate::Value::Seq($crate::SeqValue::new($elem))
    };
    ($elem:expr; $($item:expr),+ $(,)?) => {
        $crate::Value::Seq($crate::SeqValue { elem: $elem, items: vec![$($crate::Value::from($item)),+] })
    };
}

/// Build a map value: `vmap!(TypeSpec::Str, TypeSpec::Int; "a" => 1)`.
#[macro_export]
macro_rules! vmap {
    ($key:expr, $val:expr) => {
        $crate::Value::Map($crate::MapValue::new($key, $val))
    };
    ($key:expr, $val:expr; $($k:expr => $v:expr),+ $(,)?) => {{
        let mut m = $crate::MapValue::new($key, $val);
        $(m.insert($crate::Value::from($k), $crate::Value::from($v));)+
        $crate::Value::Map(m)
    }};
}
