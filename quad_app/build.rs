// build.rs
// Compiles the demo's GLSL shaders to SPIR-V with glslc from the Vulkan SDK

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 3] = ["vert", "frag", "geom"];

/// Compile every shader in `shader_dir` into `target_dir` as `<name>.<stage>.spv`
fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &Path) -> usize {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| SHADER_EXTENSIONS.contains(&ext));
        if !is_shader {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        let mut out_name = file_name.to_os_string();
        out_name.push(".spv");
        let out_file = target_dir.join(out_name);

        let up_to_date = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time <= dst_time,
                _ => false,
            },
            _ => false,
        };
        if up_to_date {
            eprintln!("info: Shader {:?} is up to date", file_name);
            continue;
        }

        let status = Command::new(glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {:?} -> {:?}", file_name, out_file);
                compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {:?} with exit code {}", path, s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", path, e),
        }
    }
    compiled
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        eprintln!("hint: Install Vulkan SDK and set VULKAN_SDK environment variable");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        PathBuf::from(vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        PathBuf::from(vulkan_sdk).join("bin").join("glslc")
    };
    if !glslc.exists() {
        panic!("Shader compiler not found at {:?}", glslc);
    }

    let target_dir = PathBuf::from("target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {:?}: {}", target_dir, e);
        return;
    }

    let compiled = compile_shaders(Path::new("resources/shaders"), &target_dir, &glslc);
    eprintln!("info: Compiled {} shader(s)", compiled);
}
