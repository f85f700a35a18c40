fn main() {
    // option_env!() values are cached by cargo unless these are tracked.
    println!("cargo:rerun-if-env-changed=THEMESERVER_BIN_DIR");
    println!("cargo:rerun-if-env-changed=THEMESERVER_DEFAULT_THEMES_DIR");
}
