use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../tsdemux.template.toml");

    let template = r#"# tsdemux configuration template
# Copy this file to 'tsdemux.toml' and adjust the values

resync_size = 65536
fix_teletext_pts = true
scan_all_pmts = "auto"
skip_unknown_pmt = false
merge_pmt_versions = false
max_packet_size = 204800
compute_pcr = false
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
