//! Component health for `GET /search/health`.

use crate::{
  service::SearchService,
  types::{ComponentHealth, HealthReport},
};

impl SearchService {
  /// Probe the engine cluster, the embedding service, and the cache store.
  /// Never fails; degraded components are reported in place.
  pub async fn health(&self) -> HealthReport {
    let engine = match self.engine().cluster_health().await {
      // Yellow is normal for a single-node cluster with replicas configured.
      Ok(status) if status == "green" || status == "yellow" => ComponentHealth {
        healthy: true,
        detail: status,
      },
      Ok(status) => ComponentHealth {
        healthy: false,
        detail: status,
      },
      Err(e) => ComponentHealth {
        healthy: false,
        detail: e.to_string(),
      },
    };

    let embedding = if self.embedder().is_available().await {
      ComponentHealth {
        healthy: true,
        detail: "ok".into(),
      }
    } else {
      ComponentHealth {
        healthy: false,
        detail: "embedding service unreachable".into(),
      }
    };

    let cache = match self.kv().ping().await {
      Ok(()) => ComponentHealth {
        healthy: true,
        detail: "ok".into(),
      },
      Err(e) => ComponentHealth {
        healthy: false,
        detail: e.to_string(),
      },
    };

    let status = if engine.healthy && embedding.healthy && cache.healthy {
      "ok"
    } else {
      "degraded"
    };
    HealthReport {
      status: status.into(),
      engine,
      embedding,
      cache,
    }
  }
}
