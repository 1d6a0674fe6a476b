// build.rs
// Compiles the GLSL shaders in resources/shaders to SPIR-V with glslc.
// Each `name.stage` source becomes `name.stage.spv` in the same directory.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 5] = ["rgen", "rmiss", "rchit", "vert", "frag"];

fn find_glslc() -> Option<PathBuf> {
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let bin = if cfg!(target_os = "windows") { "Bin/glslc.exe" } else { "bin/glslc" };
        let path = Path::new(&sdk).join(bin);
        if path.exists() {
            return Some(path);
        }
        eprintln!("warning: glslc not found under VULKAN_SDK ({sdk}), trying PATH");
    }

    // Fall back to a glslc on PATH
    Command::new("glslc")
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|_| PathBuf::from("glslc"))
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    match (
        std::fs::metadata(source).and_then(|m| m.modified()),
        std::fs::metadata(output).and_then(|m| m.modified()),
    ) {
        (Ok(source_time), Ok(output_time)) => source_time > output_time,
        _ => true,
    }
}

fn compile(glslc: &Path, shader_dir: &Path, source: &Path) -> Result<bool, String> {
    let mut output = source.as_os_str().to_owned();
    output.push(".spv");
    let output = PathBuf::from(output);

    if !needs_compile(source, &output) {
        eprintln!("info: Shader {} is up to date", source.display());
        return Ok(false);
    }

    let status = Command::new(glslc)
        .arg("--target-env=vulkan1.2")
        .arg("-I")
        .arg(shader_dir)
        .arg(source)
        .arg("-o")
        .arg(&output)
        .status()
        .map_err(|e| format!("failed to run glslc for {}: {e}", source.display()))?;

    if status.success() {
        eprintln!("info: Compiled {} -> {}", source.display(), output.display());
        Ok(true)
    } else {
        Err(format!(
            "glslc failed for {} with exit code {}",
            source.display(),
            status.code().unwrap_or(-1)
        ))
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let shader_dir = manifest_dir.join("../../resources/shaders");

    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = find_glslc() else {
        println!("cargo:warning=glslc not found; shaders were not compiled");
        return;
    };

    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at {}", shader_dir.display());
            return;
        }
    };

    let mut compiled = 0;
    for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_STAGES.contains(&ext));
        if !is_stage {
            continue;
        }
        match compile(&glslc, &shader_dir, &path) {
            Ok(true) => compiled += 1,
            Ok(false) => {}
            Err(message) => panic!("Shader compilation failed: {message}"),
        }
    }

    eprintln!("info: Compiled {compiled} shader(s)");
}
