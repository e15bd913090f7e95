//! Calls a locally running adapter, e.g. one started with
//! `cargo run -- description.json --port 8000`.

use serde_json::Value;

const URL: &str = "http://localhost:8000";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let hc = httpc_test::new_client(URL)?;

    hc.do_get("/health").await?.print().await?;

    let response = hc.do_get("/openapi.json").await?;
    let description: Value = response.json_body()?;
    let paths = description["paths"].as_object().cloned().unwrap_or_default();
    for (path, operations) in paths {
        let Some(operations) = operations.as_object() else { continue };
        if path.contains('{') || !operations.contains_key("get") {
            continue;
        }
        let base_path = description["basePath"].as_str().unwrap_or_default();
        hc.do_get(&format!("{base_path}{path}")).await?.print().await?;
    }

    Ok(())
}
