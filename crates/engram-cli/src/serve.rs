//! Read-only history visualiser
//!
//! One embedded page plus a JSON endpoint. The document is rebuilt from the
//! store on every request, so the view follows the store without any write
//! path existing here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use engram_core::Store;

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    topic: String,
}

/// Serve the visualiser until interrupted
pub fn run(store: Arc<Store>, addr: String, topic: String) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let state = AppState { store, topic };
        let app = Router::new()
            .route("/", get(index))
            .route("/api/history", get(history))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "visualiser listening");
        axum::serve(listener, app).await?;
        Ok(())
    })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn history(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.export_history(&state.topic) {
        Ok(document) => Json(document).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "history export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>engram - memory graphs</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; background: #101418; color: #e6e6e6; }
  h1 { font-size: 1.2rem; } h2 { font-size: 1rem; color: #9ecbff; }
  .agent { margin-bottom: 2rem; }
  .node { display: inline-block; margin: 0.2rem 0.6rem 0.2rem 0; }
  .bar { display: inline-block; height: 0.5rem; background: #4caf50; vertical-align: middle;
         border-radius: 2px; margin-left: 0.4rem; }
  .links { color: #aaa; font-size: 0.85rem; margin-top: 0.4rem; }
  .meta { color: #777; font-size: 0.8rem; }
</style>
</head>
<body>
<h1>engram memory graphs</h1>
<div class="meta" id="meta"></div>
<div id="agents"></div>
<script>
fetch('/api/history').then(r => r.json()).then(doc => {
  document.getElementById('meta').textContent =
    'topic: ' + (doc.metadata.topic || '(all)') + ' - exported ' + doc.metadata.exported_at;
  const container = document.getElementById('agents');
  const latest = {};
  for (const step of doc.steps) {
    for (const [agent, graph] of Object.entries(step.graphs)) latest[agent] = graph;
  }
  for (const agent of doc.agents) {
    const graph = latest[agent] || { nodes: [], links: [] };
    const section = document.createElement('div');
    section.className = 'agent';
    const title = document.createElement('h2');
    title.textContent = agent;
    section.appendChild(title);
    for (const node of graph.nodes) {
      const el = document.createElement('span');
      el.className = 'node';
      el.textContent = node.id + ' (S=' + node.stability.toFixed(2) + ')';
      const bar = document.createElement('span');
      bar.className = 'bar';
      bar.style.width = (node.retrievability * 60) + 'px';
      bar.title = 'retrievability ' + node.retrievability.toFixed(3);
      el.appendChild(bar);
      section.appendChild(el);
    }
    const links = document.createElement('div');
    links.className = 'links';
    links.textContent = graph.links
      .map(l => l.source + ' -[' + l.label + ']-> ' + l.target).join('; ');
    section.appendChild(links);
    container.appendChild(section);
  }
});
</script>
</body>
</html>
"#;
