/// Integration tests for the plate reading HTTP service
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use common::plates::{BoundingBox, ErrorResponse, UploadResponse};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use plate_service::{
    api,
    detector::{mock::StaticDetector, ObjectDetector},
    ocr::{mock::StaticRecognizer, TextRecognizer},
    ImagePipeline, PlateServiceState, UploadStore,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const MAX_UPLOAD: usize = 20 * 1024 * 1024;

struct TestService {
    server: TestServer,
    vehicles: Arc<StaticDetector>,
    plates: Arc<StaticDetector>,
    ocr: Arc<StaticRecognizer>,
    dir: TempDir,
}

fn bbox(x1: u32, y1: u32, x2: u32, y2: u32) -> BoundingBox {
    BoundingBox { x1, y1, x2, y2 }
}

fn setup(
    vehicles: StaticDetector,
    plates: StaticDetector,
    ocr: StaticRecognizer,
    legacy_paths: bool,
) -> TestService {
    setup_with_store(vehicles, plates, ocr, |dir| UploadStore::new(dir, legacy_paths))
}

fn setup_with_store(
    vehicles: StaticDetector,
    plates: StaticDetector,
    ocr: StaticRecognizer,
    store: impl FnOnce(&Path) -> UploadStore,
) -> TestService {
    let dir = tempfile::tempdir().unwrap();
    let vehicles = Arc::new(vehicles);
    let plates = Arc::new(plates);
    let ocr = Arc::new(ocr);

    let pipeline = ImagePipeline::new(
        vehicles.clone() as Arc<dyn ObjectDetector>,
        plates.clone() as Arc<dyn ObjectDetector>,
        ocr.clone() as Arc<dyn TextRecognizer>,
    );
    let store = store(dir.path());
    let state = PlateServiceState::new(pipeline, store);
    let server = TestServer::new(api::router(state, MAX_UPLOAD)).unwrap();

    TestService {
        server,
        vehicles,
        plates,
        ocr,
        dir,
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn image_form(field: &str, data: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        field,
        Part::bytes(data)
            .file_name("carro.png")
            .mime_type("image/png"),
    )
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_upload_reads_plate() {
    let service = setup(
        StaticDetector::new("vehicle", vec![bbox(10, 10, 150, 100)]),
        StaticDetector::new("plate", vec![bbox(20, 40, 80, 60)]),
        StaticRecognizer::new([Some("abc-1d23\n")]),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(200, 120)))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: UploadResponse = response.json();
    assert_eq!(body.numero_veiculos, 1);
    assert_eq!(body.placas.len(), 1);
    assert_eq!(body.placas[0], "ABC1D23");
    assert!(Path::new(&body.imagem_resultado).exists());

    // Plate detector sees the vehicle crop, not the whole image
    assert_eq!(service.plates.seen_sizes(), vec![(140, 90)]);
    assert_eq!(service.ocr.calls(), 1);
}

#[tokio::test]
async fn test_upload_response_field_names() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(64, 64)))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["numero_veiculos"], 0);
    assert_eq!(body["placas"], serde_json::json!([]));
    assert!(body["imagem_resultado"].is_string());
}

#[tokio::test]
async fn test_vehicle_count_is_independent_of_plates() {
    let service = setup(
        StaticDetector::new(
            "vehicle",
            vec![bbox(0, 0, 60, 60), bbox(60, 0, 120, 60), bbox(120, 0, 180, 60)],
        ),
        StaticDetector::scripted("plate", vec![vec![bbox(5, 5, 40, 20)], vec![], vec![bbox(5, 5, 40, 20)]]),
        StaticRecognizer::new([Some("QRM7E33"), Some("nothing useful")]),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(200, 80)))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: UploadResponse = response.json();
    assert_eq!(body.numero_veiculos, 3);
    assert_eq!(body.placas.len(), 1);
    assert_eq!(body.placas[0], "QRM7E33");
    assert_eq!(service.plates.calls(), 3);
    assert_eq!(service.ocr.calls(), 2);
}

#[tokio::test]
async fn test_upload_without_file_part() {
    let service = setup(
        StaticDetector::new("vehicle", vec![bbox(0, 0, 10, 10)]),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("imagem", png_bytes(32, 32)))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "No file part");
    assert_eq!(service.vehicles.calls(), 0);
    assert_eq!(service.plates.calls(), 0);
    assert_eq!(service.ocr.calls(), 0);
}

#[tokio::test]
async fn test_upload_without_multipart_body() {
    let service = setup(
        StaticDetector::new("vehicle", vec![bbox(0, 0, 10, 10)]),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let empty = service.server.post("/upload").await;
    assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = empty.json();
    assert_eq!(body.error, "No file part");

    let json_body = service
        .server
        .post("/upload")
        .json(&serde_json::json!({"file": "carro.jpg"}))
        .await;
    assert_eq!(json_body.status_code(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = json_body.json();
    assert_eq!(body.error, "No file part");

    assert_eq!(service.vehicles.calls(), 0);
    assert_eq!(service.ocr.calls(), 0);
}

#[tokio::test]
async fn test_upload_with_only_text_fields() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let form = MultipartForm::new().add_text("comment", "no image here");
    let response = service.server.post("/upload").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "No file part");
    assert_eq!(service.vehicles.calls(), 0);
}

#[tokio::test]
async fn test_upload_undecodable_image() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", b"definitely not an image".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert!(body.error.starts_with("Invalid image"));
    assert_eq!(service.vehicles.calls(), 0);
    assert!(dir_entries(service.dir.path()).is_empty());
}

#[tokio::test]
async fn test_ocr_failure_is_internal_error() {
    let service = setup(
        StaticDetector::new("vehicle", vec![bbox(0, 0, 50, 50)]),
        StaticDetector::new("plate", vec![bbox(0, 0, 20, 10)]),
        StaticRecognizer::failing("quota exceeded"),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(100, 100)))
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = response.json();
    assert!(body.error.contains("quota exceeded"));
    assert!(dir_entries(service.dir.path()).is_empty());
}

#[tokio::test]
async fn test_detector_failure_is_internal_error() {
    let service = setup(
        StaticDetector::failing("vehicle", "session poisoned"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(100, 100)))
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(service.plates.calls(), 0);
    assert_eq!(service.ocr.calls(), 0);
}

#[tokio::test]
async fn test_scoped_paths_leave_only_results() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let mut results = Vec::new();
    for _ in 0..2 {
        let response = service
            .server
            .post("/upload")
            .multipart(image_form("file", png_bytes(40, 40)))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: UploadResponse = response.json();
        results.push(body.imagem_resultado);
    }

    assert_ne!(results[0], results[1]);
    let entries = dir_entries(service.dir.path());
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|name| name.starts_with("resultado_") && name.ends_with(".jpg")));
}

#[tokio::test]
async fn test_old_results_are_pruned() {
    let service = setup_with_store(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        |dir| UploadStore::new(dir, false).with_keep_results(1),
    );

    let mut last = String::new();
    for _ in 0..3 {
        let response = service
            .server
            .post("/upload")
            .multipart(image_form("file", png_bytes(40, 40)))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: UploadResponse = response.json();
        last = body.imagem_resultado;
    }

    let entries = dir_entries(service.dir.path());
    assert_eq!(entries.len(), 1);
    assert!(Path::new(&last).exists());
}

#[tokio::test]
async fn test_legacy_paths_are_fixed() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        true,
    );

    for _ in 0..2 {
        let response = service
            .server
            .post("/upload")
            .multipart(image_form("file", png_bytes(40, 40)))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: UploadResponse = response.json();
        assert_eq!(
            PathBuf::from(&body.imagem_resultado),
            service.dir.path().join("resultado_imagem_atual.jpg")
        );
    }

    assert_eq!(
        dir_entries(service.dir.path()),
        vec!["imagem_atual.jpg".to_string(), "resultado_imagem_atual.jpg".to_string()]
    );
}

#[tokio::test]
async fn test_result_image_is_annotated() {
    let service = setup(
        StaticDetector::new("vehicle", vec![bbox(10, 10, 90, 70)]),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(100, 80)))
        .await;
    let body: UploadResponse = response.json();

    let result = image::open(&body.imagem_resultado).unwrap().to_rgb8();
    assert_eq!(result.dimensions(), (100, 80));
    // JPEG is lossy; the vehicle border should still read as strongly green
    let edge = result.get_pixel(50, 11);
    assert!(edge[1] > 150 && edge[0] < 100, "unexpected border pixel {:?}", edge);
}

#[tokio::test]
async fn test_healthz() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service.server.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "plate-service");
}

#[tokio::test]
async fn test_readyz_reports_components() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    let response = service.server.get("/readyz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["components"]["vehicle_detector"], true);
    assert_eq!(body["components"]["plate_detector"], true);
    assert_eq!(body["components"]["ocr"], true);
}

#[tokio::test]
async fn test_metrics_after_upload() {
    let service = setup(
        StaticDetector::empty("vehicle"),
        StaticDetector::empty("plate"),
        StaticRecognizer::new(Vec::<Option<String>>::new()),
        false,
    );

    service
        .server
        .post("/upload")
        .multipart(image_form("file", png_bytes(40, 40)))
        .await;

    let response = service.server.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let text = response.text();
    assert!(text.contains("plate_service_uploads_total"));
}
