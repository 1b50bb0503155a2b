//! Internal diagnostics macros.
//!
//! The agent must never fail or spam the host application, so its own
//! diagnostics go through these macros: they forward to `tracing` when the
//! `internal-logs` feature is enabled, print to stdout in tests, and compile
//! to nothing otherwise. They are meant for filament components (processors,
//! exporters, codecs), not for general application logging.

/// Logs an internal debug event, e.g. a malformed propagation header.
///
/// # Example
/// ```
/// use filament::fil_debug;
/// fil_debug!(name: "Codec.MalformedHeader", header = "x-filament-t");
/// ```
#[macro_export]
macro_rules! fil_debug {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            println!("fil_debug: name={}", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("fil_debug: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)+
            println!();
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    }};
}

/// Logs an internal informational event.
#[macro_export]
macro_rules! fil_info {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            println!("fil_info: name={}", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("fil_info: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)+
            println!();
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    }};
}

/// Logs an internal warning, e.g. a dropped span or a failed export.
#[macro_export]
macro_rules! fil_warn {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            println!("fil_warn: name={}", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("fil_warn: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)+
            println!();
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    }};
}

/// Logs an internal error. Reserved for failures that lose data, such as a
/// transport batch being discarded.
#[macro_export]
macro_rules! fil_error {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            println!("fil_error: name={}", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("fil_error: name={}", $name);
            $(print!(", {}={}", stringify!($key), $value);)+
            println!();
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    }};
}
