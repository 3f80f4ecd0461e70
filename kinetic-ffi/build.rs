// Regenerates include/kinetic.h with `cbindgen` when it is installed, otherwise copies the
// checked-in header to $OUT_DIR so build systems find it in one place either way.

use std::{env, fs, path::PathBuf, process::Command};

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=include/kinetic.h");

    let (Some(crate_dir), Some(out_dir)) = (env::var_os("CARGO_MANIFEST_DIR"), env::var_os("OUT_DIR")) else {
        println!("cargo:warning=kinetic-ffi: cargo did not set CARGO_MANIFEST_DIR/OUT_DIR, header skipped");
        return;
    };
    let crate_dir = PathBuf::from(crate_dir);
    let header_repo = crate_dir.join("include").join("kinetic.h");
    let header_out = PathBuf::from(out_dir).join("kinetic.h");

    let cbindgen_ok = Command::new("cbindgen")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if cbindgen_ok {
        let generated = Command::new("cbindgen")
            .args(["--crate", "kinetic-ffi", "--lang", "C", "--output"])
            .arg(&header_out)
            .current_dir(&crate_dir)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if generated {
            if let Err(e) = fs::copy(&header_out, &header_repo) {
                println!("cargo:warning=kinetic-ffi: could not refresh include/kinetic.h: {e}");
            }
            return;
        }
        println!("cargo:warning=kinetic-ffi: cbindgen failed; using the checked-in header");
    }

    if let Err(e) = fs::copy(&header_repo, &header_out) {
        println!("cargo:warning=kinetic-ffi: could not copy include/kinetic.h to OUT_DIR: {e}");
    }
}
