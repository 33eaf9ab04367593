#[macro_export]
macro_rules! eeprintln {
    ($($arg:tt)*) => {{
        if *$crate::print::IS_GIT_BASH {
            println!("{}", format_args!($($arg)*));
        } else {
            eprintln!("{}", format_args!($($arg)*));
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($sink:ident, $kind:ident, $color:ident, $stderr:expr, $($arg:tt)*) => {{
        let msg = $crate::print::auto_redact(&format!($($arg)*));
        if $crate::print::is_print() {
            let tag = $crate::owo_colors::OwoColorize::$color(&$crate::print::LogType::$kind);
            if $stderr {
                $crate::eeprintln!("{tag} {msg}");
            } else {
                println!("{tag} {msg}");
            }
        }
        $crate::print::$sink(&msg, $crate::print::LogType::$kind);
    }};
}

/// Print an informational message
#[macro_export]
macro_rules! info {
    (no_log, $($arg:tt)*) => {
        $crate::__log!(print_to_memory, Info, yellow, false, $($arg)*)
    };
    ($($arg:tt)*) => {
        $crate::__log!(print_to_file, Info, yellow, false, $($arg)*)
    };
}

/// Print a point message, i.e. a small step in some process
#[macro_export]
macro_rules! pt {
    (no_log, $($arg:tt)*) => {
        $crate::__log!(print_to_memory, Point, bold, false, $($arg)*)
    };
    ($($arg:tt)*) => {
        $crate::__log!(print_to_file, Point, bold, false, $($arg)*)
    };
}

/// Print a warning: something was off, but it was handled
#[macro_export]
macro_rules! warn {
    (no_log, $($arg:tt)*) => {
        $crate::__log!(print_to_memory, Warn, bright_yellow, true, $($arg)*)
    };
    ($($arg:tt)*) => {
        $crate::__log!(print_to_file, Warn, bright_yellow, true, $($arg)*)
    };
}

/// Print an error message
#[macro_export]
macro_rules! err {
    (no_log, $($arg:tt)*) => {
        $crate::__log!(print_to_memory, Error, red, true, $($arg)*)
    };
    ($($arg:tt)*) => {
        $crate::__log!(print_to_file, Error, red, true, $($arg)*)
    };
}
