use std::{env, fs};
use std::path::PathBuf;

// CoreBluetooth refuses to scan unless the process carries a Bluetooth usage description.
const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>org.ble-bridge.cli</string>
    <key>CFBundleName</key>
    <string>ble-bridge</string>
    <key>CFBundleShortVersionString</key>
    <string>{VERSION}</string>
    <key>NSBluetoothAlwaysUsageDescription</key>
    <string>ble-bridge exchanges messages with a Bluetooth LE peripheral.</string>
</dict>
</plist>
"#;

fn out_dir() -> String {
    env::var("OUT_DIR").expect("No OUT_DIR env var")
}

fn build_info_plist() {
    let version = env::var("CARGO_PKG_VERSION").expect("No CARGO_PKG_VERSION env var");
    let out_path: PathBuf = [out_dir().as_str(), "Info.plist"].iter().collect();

    println!("DEBUG: writing Info.plist to {}", out_path.display());
    fs::write(&out_path, INFO_PLIST.replace("{VERSION}", &version)).expect("Failed to write Info.plist");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    build_info_plist();
}
