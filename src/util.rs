/// Logs a warning at most once per macro expansion site for the lifetime
/// of the process: each expansion carries its own `Once`, so the guard is
/// keyed by where the macro is written, not by who calls the surrounding
/// function. Used to surface deprecated-usage notices without flooding the
/// log on every solve.
#[macro_export]
macro_rules! warn_once {
    ($($arg:tt)*) => {{
        static ONCE: ::std::sync::Once = ::std::sync::Once::new();
        ONCE.call_once(|| ::log::warn!($($arg)*));
    }};
}
