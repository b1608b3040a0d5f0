use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PEEPCHECK_Z3_DIR");

    // Only the solver-backed build links libz3.
    if env::var_os("CARGO_FEATURE_Z3").is_none() || !cfg!(windows) {
        return;
    }

    // Windows resolves DLLs next to the executable; copy libz3.dll there when
    // a Z3 distribution is configured.
    let Some(z3_dir) = env::var_os("PEEPCHECK_Z3_DIR").map(PathBuf::from) else {
        println!("cargo:warning=PEEPCHECK_Z3_DIR is not set; libz3.dll must be on PATH");
        return;
    };
    let dll_src = z3_dir.join("bin").join("libz3.dll");
    println!("cargo:rerun-if-changed={}", dll_src.display());

    if !dll_src.exists() {
        panic!("PEEPCHECK_Z3_DIR is set, but {} is missing", dll_src.display());
    }

    let Some(manifest_dir) = env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from) else {
        return;
    };
    let workspace_root = manifest_dir.parent().map(PathBuf::from).unwrap_or(manifest_dir);
    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let dll_dst = workspace_root.join("target").join(profile).join("libz3.dll");

    if let Some(parent) = dll_dst.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let stale = match (fs::metadata(&dll_src), fs::metadata(&dll_dst)) {
        (Ok(src), Ok(dst)) => src.modified().ok() != dst.modified().ok(),
        _ => true,
    };
    if stale {
        fs::copy(&dll_src, &dll_dst).unwrap_or_else(|e| {
            panic!("failed to copy {} to {}: {e}", dll_src.display(), dll_dst.display())
        });
    }
}
