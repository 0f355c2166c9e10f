#[cfg(not(any(feature = "rustls-marker", feature = "native-marker")))]
compile_error!(
    "You have the default features disabled: \
    either the `rustls` or `native` feature must be
    selected to let Warbler's driver use websockets.\n\
    - `rustls` uses Rustls, a pure Rust TLS-implemenation.\n\
    - `native` uses SChannel on Windows, Secure Transport on macOS, \
    and OpenSSL on other platforms.\n\
    If you are unsure, go with `rustls`."
);

fn main() {}
