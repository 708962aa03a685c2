//! One-shot HTTP server for exercising the real client in tests.

use std::io::Read;
use std::thread;

/// What the server received.
pub(crate) struct Captured {
    pub method: String,
    pub url: String,
    pub body: String,
}

/// Serve exactly one request with `status` and `body`.
///
/// Returns the host to point a client at and a handle yielding the
/// captured request.
pub(crate) fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<Captured>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();

    let handle = thread::spawn(move || {
        let mut request = server.recv().unwrap();
        let mut body_in = String::new();
        request.as_reader().read_to_string(&mut body_in).unwrap();
        let captured = Captured {
            method: request.method().to_string(),
            url: request.url().to_string(),
            body: body_in,
        };
        let response = tiny_http::Response::from_string(body).with_status_code(status);
        request.respond(response).unwrap();
        captured
    });

    (format!("http://{addr}"), handle)
}
