//! Generate MessagePack test vectors for client interop testing.
//!
//! Run with: cargo run --package protocol --example test_vectors

use protocol::messages::*;

fn main() {
    // Listing request carrying a bearer token
    let list = Envelope::new(
        1,
        Message::ListRequest(ListRequest {
            path: "/documents".to_string(),
            include_hidden: false,
        }),
    )
    .with_bearer("header.payload.signature");
    print_test_vector("list_request", &list);

    // Listing response with one file
    let listing = Envelope::new(
        2,
        Message::ListResponse(ListResponse {
            path: "/documents".to_string(),
            entries: vec![FileRecord {
                name: "report.pdf".to_string(),
                virtual_path: "/documents/report.pdf".to_string(),
                size: 2048,
                is_directory: false,
                modified: 1704067200,
                mode: 0o644,
                mime_type: Some("application/pdf".to_string()),
            }],
        }),
    );
    print_test_vector("list_response", &listing);

    // Upload
    let upload = Envelope::new(
        3,
        Message::UploadRequest(UploadRequest {
            directory: "/documents".to_string(),
            filename: "a.txt".to_string(),
            data: b"0123456789".to_vec(),
        }),
    );
    print_test_vector("upload_request", &upload);

    // Quota response
    let quota = Envelope::new(4, Message::QuotaResponse(QuotaInfo::new(512_000, 1_048_576)));
    print_test_vector("quota_response", &quota);

    // Error message
    let error = Envelope::new(
        5,
        Message::Error(ErrorMessage {
            code: ErrorCode::QuotaExceeded,
            message: "quota exceeded: current usage 500.00 KB + 600.00 KB exceeds limit 1.00 MB"
                .to_string(),
            context: Some("/documents".to_string()),
            recoverable: false,
        }),
    );
    print_test_vector("error", &error);

    // Export continuation
    let export = Envelope::new(
        6,
        Message::ExportChunkRequest(ExportChunkRequest {
            export_id: 1,
            offset: 65536,
            chunk_size: 0,
        }),
    );
    print_test_vector("export_chunk_request", &export);
}

fn print_test_vector(name: &str, envelope: &Envelope) {
    let bytes = envelope.to_msgpack().expect("serialization failed");
    print!("export const {} = new Uint8Array([", name);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            print!(", ");
        }
        print!("{}", b);
    }
    println!("]);");
}
