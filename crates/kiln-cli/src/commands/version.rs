use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "name": "kiln", "version": kiln_core::VERSION })
        );
    } else {
        println!("kiln {}", kiln_core::VERSION);
    }
    Ok(())
}
