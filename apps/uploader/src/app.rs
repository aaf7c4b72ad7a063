//! Wires the loader, simulated link and orchestrator together for one upload.

use std::sync::Arc;

use anyhow::Context;
use nodeflash_image::FileImageLoader;
use nodeflash_uploader::{
    ChannelObserver, NodeAddress, Outcome, UploadEvent, UploadOrchestrator,
};
use serde::Serialize;

use crate::config::Config;
use crate::link::SimulatedLink;

/// Summary printed once the upload is over.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub upload_id: String,
    pub target: NodeAddress,
    pub image: String,
    pub outcome: Outcome,
    pub code: i32,
    pub retries: u32,
    pub elapsed_ms: u64,
}

/// Runs a single upload to completion.
pub async fn run(config: Config) -> anyhow::Result<UploadReport> {
    let target: NodeAddress = config
        .target
        .parse()
        .with_context(|| format!("bad target address {:?}", config.target))?;

    let loader = Arc::new(FileImageLoader::new(config.uploader.max_image_size));
    let orch = UploadOrchestrator::spawn(config.uploader.to_uploader_config(), loader)?;
    let mut events = orch
        .take_events()
        .context("upload event stream already taken")?;

    let (observer, mut outcomes) = ChannelObserver::channel(1);
    orch.configure(Arc::new(SimulatedLink::new(config.link.settings())))
        .await?;
    orch.register_observer(Arc::new(observer)).await?;

    let start = tokio::time::Instant::now();
    let upload_id = orch.begin_upload(target, &config.image).await?;

    let outcome = tokio::select! {
        outcome = outcomes.recv() => outcome.context("orchestrator stopped before reporting")?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted"),
    };

    // Finished is emitted just before the observer runs, so it is already queued.
    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            UploadEvent::Finished {
                upload_id: id,
                retries: r,
                ..
            } if id == upload_id => retries = r,
            UploadEvent::Retrying { retry, reason, .. } => {
                tracing::debug!(retry, ?reason, "retry recorded");
            }
            _ => {}
        }
    }

    Ok(UploadReport {
        upload_id: upload_id.to_string(),
        target,
        image: config.image.display().to_string(),
        outcome,
        code: outcome.code(),
        retries,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkSection, UploaderSection};

    fn config_for(image: std::path::PathBuf, link: LinkSection) -> Config {
        Config {
            target: "03f95a".into(),
            image,
            uploader: UploaderSection {
                wait_budget: 5,
                ..UploaderSection::default()
            },
            link,
        }
    }

    #[tokio::test]
    async fn uploads_over_simulated_link() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("blink.spy");
        std::fs::write(&image, vec![0x5Au8; 400]).unwrap();

        let report = run(config_for(image, LinkSection::default())).await.unwrap();
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.code, 0);
        assert_eq!(report.retries, 0);
        assert_eq!(report.target.to_string(), "03f95a");
    }

    #[tokio::test]
    async fn recovers_from_lost_transfer() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("blink.spy");
        std::fs::write(&image, b"script").unwrap();

        let link = LinkSection {
            latency_ms: 100,
            lost_transfers: 1,
            ..LinkSection::default()
        };
        let report = run(config_for(image, link)).await.unwrap();
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.retries, 1);
    }

    #[tokio::test]
    async fn gives_up_when_link_keeps_losing() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("blink.spy");
        std::fs::write(&image, b"script").unwrap();

        let link = LinkSection {
            lost_transfers: 10,
            ..LinkSection::default()
        };
        let report = run(config_for(image, link)).await.unwrap();
        assert_eq!(report.outcome, Outcome::RetriesExhausted);
        assert_eq!(report.code, -3);
        assert_eq!(report.retries, 3);
    }

    #[tokio::test]
    async fn missing_image_reports_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(config_for(dir.path().join("nope.spy"), LinkSection::default()))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::SourceNotFound);
        assert_eq!(report.code, -2);
    }

    #[tokio::test]
    async fn bad_target_is_an_error() {
        let mut config = config_for("blink.spy".into(), LinkSection::default());
        config.target = "not-hex".into();
        assert!(run(config).await.is_err());
    }

    #[test]
    fn report_serializes_to_json() {
        let report = UploadReport {
            upload_id: "id".into(),
            target: NodeAddress::new([1, 2, 3]),
            image: "blink.spy".into(),
            outcome: Outcome::RetriesExhausted,
            code: -3,
            retries: 3,
            elapsed_ms: 300_000,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target"], "010203");
        assert_eq!(json["outcome"], "retries_exhausted");
        assert_eq!(json["code"], -3);
    }
}
