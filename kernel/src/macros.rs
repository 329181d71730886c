// Per-fault tracing on the DB_VM channel. Expands to nothing unless the
// `debug_vm` feature is enabled.
macro_rules! vm_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "debug_vm")]
        ::novavm_shared::println!("novavm: {}", format_args!($($arg)*));
    }};
}
