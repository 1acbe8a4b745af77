fn main() {
    println!("Run `cargo test -p end-to-end` to execute the full-stack upload tests.");
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use slicedrop_client::{HttpUploadApi, UploadEvent, Uploader, UploaderConfig};
    use slicedrop_protocol::{ArtifactKey, MergeChunksRequest};
    use slicedrop_server::{ServerConfig, UploadServer};
    use slicedrop_transfer::{
        ChunkedFile, HashAlgorithm, TransferError, UploadApi, calculate_file_checksum, split_file,
    };
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    const MIB: usize = 1024 * 1024;

    /// A real server on an ephemeral port, storing under a temp dir.
    struct TestServer {
        server: Arc<UploadServer>,
        handle: JoinHandle<()>,
        base_url: String,
        storage: tempfile::TempDir,
    }

    impl TestServer {
        async fn start() -> Self {
            let storage = tempfile::tempdir().unwrap();
            let server = UploadServer::new(ServerConfig {
                bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
                storage_root: storage.path().to_path_buf(),
                ..ServerConfig::default()
            });
            let run = Arc::clone(&server);
            let handle = tokio::spawn(async move {
                run.run().await.unwrap();
            });

            // Wait for the server to bind.
            let port = loop {
                let p = server.port().await;
                if p > 0 {
                    break p;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };

            Self {
                server,
                handle,
                base_url: format!("http://127.0.0.1:{port}"),
                storage,
            }
        }

        fn api(&self) -> HttpUploadApi {
            HttpUploadApi::new(&self.base_url).unwrap()
        }

        fn artifact_path(&self, file_hash: &str, ext: &str) -> PathBuf {
            let key = ArtifactKey::new(file_hash, ext).unwrap();
            self.storage.path().join(key.path())
        }

        async fn stop(self) {
            self.server.shutdown();
            self.handle.await.unwrap();
        }
    }

    /// Writes `len` pseudo-random bytes to `dir/name`.
    fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let mut state: u32 = 0x9e37_79b9;
        let data: Vec<u8> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn split(path: &Path, chunk_size: usize) -> ChunkedFile {
        split_file(path, chunk_size as u64, HashAlgorithm::Md5, |_, _, _| {}).unwrap()
    }

    async fn upload_chunk(api: &HttpUploadApi, file: &ChunkedFile, index: usize) {
        let chunk = &file.chunks[index];
        let data = file.load(chunk).await.unwrap();
        api.upload_chunk(file.chunk_key(chunk).unwrap(), data)
            .await
            .unwrap();
    }

    fn merge_request(file: &ChunkedFile, chunk_count: Option<u64>) -> MergeChunksRequest {
        MergeChunksRequest {
            file_ext: file.identity.file_ext.clone(),
            file_hash: file.identity.file_hash.clone(),
            chunk_size: file.chunk_size,
            chunk_count,
        }
    }

    #[tokio::test]
    async fn ten_megabytes_out_of_order_with_duplicate() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, data) = write_source(src.path(), "video.mp4", 10 * MIB);
        let file = split(&path, MIB);
        assert_eq!(file.chunks.len(), 10);

        let api = server.api();
        let artifact = file.artifact_key().unwrap();
        assert!(!api.validate_file(artifact.clone()).await.unwrap());

        // Out of order, chunk 7 twice.
        for index in [9, 3, 7, 0, 5, 1, 7, 8, 2, 6, 4] {
            upload_chunk(&api, &file, index).await;
        }
        for chunk in &file.chunks {
            assert!(api.validate_chunk(file.chunk_key(chunk).unwrap()).await.unwrap());
        }

        let href = api
            .merge_chunks(merge_request(&file, Some(10)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(href, format!("/files/{}.mp4", file.identity.file_hash));

        let on_disk = std::fs::read(server.artifact_path(&file.identity.file_hash, "mp4")).unwrap();
        assert_eq!(on_disk.len(), data.len());
        assert!(on_disk == data, "merged bytes differ from source");

        let served = reqwest::get(format!("{}{href}", server.base_url))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert!(served.as_ref() == data.as_slice());

        assert!(api.validate_file(artifact.clone()).await.unwrap());
        assert_eq!(api.file_href(artifact).await.unwrap(), Some(href.clone()));

        // Merging again returns the same artifact.
        let again = api.merge_chunks(merge_request(&file, Some(10))).await.unwrap();
        assert_eq!(again, Some(href));

        server.stop().await;
    }

    #[tokio::test]
    async fn gap_is_reported_as_chunks_missing() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, _) = write_source(src.path(), "gap.bin", 4 * 1024);
        let file = split(&path, 1024);

        let api = server.api();
        for index in [0, 1, 3] {
            upload_chunk(&api, &file, index).await;
        }

        let err = api
            .merge_chunks(merge_request(&file, Some(4)))
            .await
            .unwrap_err();
        match err {
            TransferError::Api(message) => {
                assert!(message.starts_with("chunks missing"), "{message}");
                assert!(message.contains("indices 2"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!api.validate_file(file.artifact_key().unwrap()).await.unwrap());
        assert!(!server.artifact_path(&file.identity.file_hash, "bin").exists());

        // The missing tail is only detectable with a chunk count.
        let err = api
            .merge_chunks(merge_request(&file, Some(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Api(_)));

        server.stop().await;
    }

    #[tokio::test]
    async fn chunks_merge_in_numeric_order() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, data) = write_source(src.path(), "many.dat", 12 * 64 + 5);
        let file = split(&path, 64);
        assert_eq!(file.chunks.len(), 13);

        let api = server.api();
        for index in (0..file.chunks.len()).rev() {
            upload_chunk(&api, &file, index).await;
        }
        api.merge_chunks(merge_request(&file, None)).await.unwrap();

        let merged = std::fs::read(server.artifact_path(&file.identity.file_hash, "dat")).unwrap();
        assert_eq!(merged, data);

        server.stop().await;
    }

    #[tokio::test]
    async fn uploader_resumes_partial_upload() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, data) = write_source(src.path(), "backup.tar", 3 * MIB + 17);
        let file = split(&path, 256 * 1024);
        let total = file.chunks.len();

        // A previous session got the first half across.
        let api = server.api();
        for index in 0..total / 2 {
            upload_chunk(&api, &file, index).await;
        }

        let uploader = Uploader::new(
            Arc::new(server.api()),
            UploaderConfig {
                chunk_size: 256 * 1024,
                max_concurrent: 4,
                ..UploaderConfig::default()
            },
        );
        let (tx, mut rx) = mpsc::channel(1024);
        let drain = tokio::spawn(async move {
            let mut skipped = Vec::new();
            while let Some(event) = rx.recv().await {
                if let UploadEvent::Skipped { indices } = event {
                    skipped = indices;
                }
            }
            skipped
        });

        let outcome = uploader.upload_file(&path, tx).await.unwrap();
        assert!(!outcome.instant);
        assert_eq!(outcome.skipped_chunks, total / 2);
        assert_eq!(outcome.uploaded_chunks, total - total / 2);
        assert_eq!(drain.await.unwrap(), (0..(total / 2) as u64).collect::<Vec<_>>());

        let merged = std::fs::read(server.artifact_path(&outcome.identity.file_hash, "tar")).unwrap();
        assert!(merged == data);
        assert_eq!(
            outcome.identity.file_hash,
            calculate_file_checksum(&path, HashAlgorithm::Md5).unwrap()
        );

        // Second run finds the merged file.
        let (tx, _rx) = mpsc::channel(1024);
        let second = uploader.upload_file(&path, tx).await.unwrap();
        assert!(second.instant);
        assert_eq!(second.href, outcome.href);
        assert_eq!(uploader.check(&path).await.unwrap(), Some(outcome.href));

        server.stop().await;
    }

    #[tokio::test]
    async fn concurrent_merges_agree() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, data) = write_source(src.path(), "race.bin", 8 * 1024);
        let file = split(&path, 1024);

        let api = server.api();
        for index in 0..file.chunks.len() {
            upload_chunk(&api, &file, index).await;
        }

        let merges = (0..4).map(|_| {
            let api = server.api();
            let request = merge_request(&file, Some(8));
            async move { api.merge_chunks(request).await }
        });
        let results = futures_util::future::join_all(merges).await;
        let hrefs: Vec<String> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        assert!(hrefs.windows(2).all(|w| w[0] == w[1]));

        let merged = std::fs::read(server.artifact_path(&file.identity.file_hash, "bin")).unwrap();
        assert_eq!(merged, data);

        server.stop().await;
    }

    #[tokio::test]
    async fn sha256_hashes_are_accepted() {
        let server = TestServer::start().await;
        let src = tempfile::tempdir().unwrap();
        let (path, data) = write_source(src.path(), "doc.txt", 5000);

        let uploader = Uploader::new(
            Arc::new(server.api()),
            UploaderConfig {
                chunk_size: 1024,
                algorithm: HashAlgorithm::Sha256,
                ..UploaderConfig::default()
            },
        );
        let (tx, _rx) = mpsc::channel(1024);
        let outcome = uploader.upload_file(&path, tx).await.unwrap();
        assert_eq!(outcome.identity.file_hash.len(), 64);

        let merged = std::fs::read(server.artifact_path(&outcome.identity.file_hash, "txt")).unwrap();
        assert_eq!(merged, data);

        server.stop().await;
    }
}
