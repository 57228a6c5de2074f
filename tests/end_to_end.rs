// Full relay over real sockets: raw HTTP/1.1 intake, hyper outbound client, local destination server
#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use axum::{Router, body::Body, http::StatusCode};
    use bytes::Bytes;
    use delayhttp::{
        adapters::{HttpClientAdapter, HttpHandler, router},
        config::{DispatchConfig, OutboundConfig},
        core::{Dispatcher, ROUTING_HEADER, StatsRegister},
        utils::{GracefulShutdown, ShutdownReason},
    };
    use futures_util::stream;
    use http::{HeaderMap, Method, Request};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    #[derive(Debug, Clone)]
    struct Received {
        method: Method,
        path_and_query: String,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    /// Destination server recording every request it gets.
    async fn spawn_destination() -> (SocketAddr, Arc<Mutex<Vec<Received>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        let app = Router::new().fallback(move |req: Request<Body>| {
            let log = log.clone();
            async move {
                let (parts, body) = req.into_parts();
                let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                log.lock().unwrap().push(Received {
                    method: parts.method,
                    path_and_query: parts
                        .uri
                        .path_and_query()
                        .map(|pq| pq.to_string())
                        .unwrap_or_default(),
                    headers: parts.headers,
                    body: body.to_vec(),
                });
                StatusCode::NO_CONTENT
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, received)
    }

    /// Destination answering 200 with a body that never ends.
    async fn spawn_endless_destination() -> SocketAddr {
        let app = Router::new().fallback(|| async {
            let trickle = stream::unfold((), |()| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from_static(b".")), ()))
            });
            Body::from_stream(trickle)
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Write one raw request and return the full response text.
    async fn raw_request(relay: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(relay).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relay_forwards_to_destination() {
        let (destination, received) = spawn_destination().await;

        let outbound = OutboundConfig {
            request_timeout: "5s".to_string(),
            max_retries: 1,
            retry_wait_min: "10ms".to_string(),
            retry_wait_max: "50ms".to_string(),
            ..OutboundConfig::default()
        };
        let client = Arc::new(HttpClientAdapter::new(&outbound).unwrap());
        let dispatcher = Arc::new(Dispatcher::start(
            &DispatchConfig::default(),
            client,
            Arc::new(StatsRegister::new()),
        ));
        let app = router(Arc::new(HttpHandler::new(dispatcher.clone(), 1024)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = listener.local_addr().unwrap();
        let shutdown = GracefulShutdown::new();
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        shutdown.wait_for_shutdown_signal().await;
                    })
                    .await
            }
        });

        // Absolute-form target so the captured scheme is plain http
        let request = format!(
            "POST http://relay.test/webhook?id=9 HTTP/1.1\r\n\
             Host: relay.test\r\n\
             {ROUTING_HEADER}: {destination}\r\n\
             X-Trace: t-1\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 5\r\n\
             Connection: close\r\n\
             \r\n\
             hello"
        );
        let response = raw_request(relay_addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("OK"), "{response}");

        tokio::time::timeout(Duration::from_secs(10), async {
            while received.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("destination never received the job");

        let got = received.lock().unwrap()[0].clone();
        assert_eq!(got.method, Method::POST);
        assert_eq!(got.path_and_query, "/webhook?id=9");
        assert_eq!(got.body, b"hello");
        assert!(got.headers.get(ROUTING_HEADER).is_none());
        assert_eq!(got.headers["host"], destination.to_string().as_str());
        assert_eq!(got.headers["x-trace"], "t-1");
        assert!(
            got.headers["user-agent"]
                .to_str()
                .unwrap()
                .starts_with("delayhttp/")
        );

        shutdown.trigger_shutdown(ShutdownReason::Requested);
        server.await.unwrap().unwrap();
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

        let stats = dispatcher.stats();
        assert_eq!((stats.received, stats.completed, stats.failed), (1, 1, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_destination_counts_as_failed() {
        // Bind then drop to get a port nobody listens on
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let outbound = OutboundConfig {
            request_timeout: "2s".to_string(),
            max_retries: 1,
            retry_wait_min: "10ms".to_string(),
            retry_wait_max: "20ms".to_string(),
            ..OutboundConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::start(
            &DispatchConfig {
                workers: 1,
                ..DispatchConfig::default()
            },
            Arc::new(HttpClientAdapter::new(&outbound).unwrap()),
            Arc::new(StatsRegister::new()),
        ));
        let app = router(Arc::new(HttpHandler::new(dispatcher.clone(), 1024)));

        let req = Request::builder()
            .uri("http://relay.test/ping")
            .header(ROUTING_HEADER, closed.to_string())
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(dispatcher.shutdown(Duration::from_secs(10)).await);
        let stats = dispatcher.stats();
        assert_eq!((stats.received, stats.completed, stats.failed), (1, 0, 1));
        assert_eq!(
            stats.to_string(),
            "Received : [1] = Done [0] + Failed [1] + Working [0]"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_endless_response_body_does_not_wedge_the_worker() {
        let destination = spawn_endless_destination().await;

        let outbound = OutboundConfig {
            request_timeout: "500ms".to_string(),
            max_retries: 0,
            ..OutboundConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::start(
            &DispatchConfig {
                workers: 1,
                ..DispatchConfig::default()
            },
            Arc::new(HttpClientAdapter::new(&outbound).unwrap()),
            Arc::new(StatsRegister::new()),
        ));
        let app = router(Arc::new(HttpHandler::new(dispatcher.clone(), 1024)));

        let req = Request::builder()
            .uri("http://relay.test/stream")
            .header(ROUTING_HEADER, destination.to_string())
            .body(Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(app, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dispatcher.stats().is_settled() || dispatcher.pool_summary().idle != 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job stuck in delivery");

        let stats = dispatcher.stats();
        assert_eq!((stats.received, stats.completed, stats.failed), (1, 1, 0));
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    }
}
