// build.rs

fn main() {
    // Generate build info for the version banner
    vergen::EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("Unable to generate build info");
}
