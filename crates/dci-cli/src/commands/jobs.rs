//! Job commands.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

use super::{field, print_json};
use crate::client::ApiClient;

pub async fn schedule(client: &ApiClient, remoteci: &str, topic: &str) -> Result<()> {
    let reply = client
        .post(
            "jobs/schedule",
            &json!({ "remoteci_id": remoteci, "topic_id": topic }),
        )
        .await?;
    print_json(&reply.body)
}

pub async fn recheck(client: &ApiClient, id: &str) -> Result<()> {
    let reply = client
        .post(&format!("jobs/{}/recheck", id), &json!({}))
        .await?;
    print_json(&reply.body)
}

pub async fn list(
    client: &ApiClient,
    filter: Option<String>,
    sort: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<()> {
    let mut query = Vec::new();
    if let Some(filter) = filter {
        query.push(("where", filter));
    }
    if let Some(sort) = sort {
        query.push(("sort", sort));
    }
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(offset) = offset {
        query.push(("offset", offset.to_string()));
    }

    let reply = client.get("jobs", &query).await?;
    let jobs = reply
        .body
        .get("jobs")
        .and_then(Value::as_array)
        .context("response has no jobs")?;

    println!("{:<38} {:<10} {:<26} COMMENT", "ID", "STATUS", "CREATED");
    for job in jobs {
        println!(
            "{:<38} {:<10} {:<26} {}",
            field(job, "id"),
            field(job, "status"),
            field(job, "created_at"),
            job.get("comment").and_then(Value::as_str).unwrap_or(""),
        );
    }
    let count = reply.body["_meta"]["count"].as_i64().unwrap_or_default();
    println!("{} of {} jobs", jobs.len(), count);
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str, embed: Option<String>) -> Result<()> {
    let query: Vec<(&str, String)> = embed.into_iter().map(|e| ("embed", e)).collect();
    let reply = client.get(&format!("jobs/{}", id), &query).await?;
    print_json(&reply.body)
}

pub async fn update(
    client: &ApiClient,
    id: &str,
    status: Option<String>,
    comment: Option<String>,
) -> Result<()> {
    let mut patch = Map::new();
    if let Some(status) = status {
        patch.insert("status".into(), Value::String(status));
    }
    if let Some(comment) = comment {
        patch.insert("comment".into(), Value::String(comment));
    }
    if patch.is_empty() {
        bail!("nothing to update: pass --status or --comment");
    }

    let path = format!("jobs/{}", id);
    let current = client.get(&path, &[]).await?;
    let etag = current
        .etag
        .context("job response carried no ETag header")?;
    let etag = client.put(&path, &etag, &Value::Object(patch)).await?;
    println!("Job {} updated (etag {})", id, etag.as_deref().unwrap_or("-"));
    Ok(())
}

pub async fn upload(
    client: &ApiClient,
    id: &str,
    path: &Path,
    name: Option<String>,
    mime: Option<String>,
) -> Result<()> {
    let content =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("file path has no usable name; pass --name")?,
    };
    let mime = mime.unwrap_or_else(|| guess_mime(&name).to_string());

    let reply = client
        .upload(&format!("jobs/{}/files", id), &name, &mime, content)
        .await?;
    print_json(&reply.body)
}

fn guess_mime(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("xml") => "application/junit",
        Some("json") => "application/json",
        Some("log") | Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("tempest.xml"), "application/junit");
        assert_eq!(guess_mime("console.log"), "text/plain");
        assert_eq!(guess_mime("archive"), "application/octet-stream");
    }
}
