fn main() {
    // Log metadata and union payload types
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(&["src/protos"])
        .input("src/protos/pblog.proto")
        // Lands in $OUT_DIR/protos, picked up by src/protos.rs
        .cargo_out_dir("protos")
        .run_from_script();

    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rerun-if-changed=src/protos/pblog.proto");
}
