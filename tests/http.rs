use std::net::SocketAddr;

use camino::Utf8PathBuf;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use genolab::app::App;
use genolab::domain::{Gender, NO_MATCHES, NewPatient, NewTechnician, PatientId};
use genolab::http::{AppState, build_router};
use genolab::store::SqliteStore;
use genolab::uploads::UploadDir;

const BOUNDARY: &str = "genolab-test-boundary";

struct Harness {
    addr: SocketAddr,
    upload_root: Utf8PathBuf,
    patient_id: PatientId,
    _temp: tempfile::TempDir,
}

async fn start(catalog: &[(&str, &str)]) -> Harness {
    start_with_limit(catalog, 1024 * 1024).await
}

async fn start_with_limit(catalog: &[(&str, &str)], max_upload_bytes: usize) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let upload_root = Utf8PathBuf::from_path_buf(temp.path().join("uploads")).expect("utf8 path");

    let store = SqliteStore::open_in_memory().expect("open store");
    for (name, genes) in catalog {
        store.add_disease(name, "", genes).expect("seed catalog");
    }
    let technician = store
        .create_lab_technician(NewTechnician {
            first_name: "Ana".to_string(),
            last_name: "Ruiz".to_string(),
            email: "ana@lab.test".to_string(),
            password_hash: "digest".to_string(),
            phone: None,
        })
        .expect("seed technician");
    let patient = store
        .create_patient(NewPatient {
            first_name: "Luis".to_string(),
            last_name: "Paz".to_string(),
            age: 40,
            gender: Gender::Male,
            technician_id: technician.id,
        })
        .expect("seed patient");

    let app = App::new(store, UploadDir::new(upload_root.clone()));
    let router = build_router(AppState::new(app), max_upload_bytes);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    Harness {
        addr,
        upload_root,
        patient_id: patient.id,
        _temp: temp,
    }
}

async fn send_raw(addr: SocketAddr, request: Vec<u8>) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.expect("connect server");
    stream.write_all(&request).await.expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status");
    let json = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, json)
}

fn get(addr: SocketAddr, path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n").into_bytes()
}

fn multipart_upload(addr: SocketAddr, patient_id: Option<&str>, csv: Option<&str>) -> Vec<u8> {
    let mut body = String::new();
    if let Some(patient_id) = patient_id {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"paciente_id\"\r\n\r\n{patient_id}\r\n"
        ));
    }
    if let Some(csv) = csv {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"archivo\"; filename=\"markers.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    format!(
        "POST /api/analisis/subir-adn HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn upload_dir_is_empty(root: &Utf8PathBuf) -> bool {
    match std::fs::read_dir(root.as_std_path()) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn upload_returns_detected_disease_and_persists_it() {
    let harness = start(&[("Breast Cancer", "BRCA1, BRCA2")]).await;
    let csv = "posicion,gen,nucleotido,mutacion\n100,BRCA1,A,Sí\n200,TP53,G,No\n300,,C,Sí\n";
    let patient = harness.patient_id.to_string();

    let (status, body) = send_raw(
        harness.addr,
        multipart_upload(harness.addr, Some(&patient), Some(csv)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["enfermedad_detectada"], "Breast Cancer");
    assert_eq!(body["mutaciones_detectadas"], serde_json::json!(["sí"]));
    assert_eq!(body["nucleotidos_detectados"], serde_json::json!(["A", "G"]));
    let sequence = body["secuenciaADN"].as_array().expect("sequence array");
    assert_eq!(sequence.len(), 2);
    assert_eq!(sequence[0]["gen"], "BRCA1");
    assert_eq!(sequence[0]["posicion"], 100);
    assert_eq!(sequence[0]["mutacion"], true);
    assert_eq!(sequence[0]["tipo_mutacion"], "Unknown");
    assert!(upload_dir_is_empty(&harness.upload_root));

    let (status, analyses) = send_raw(harness.addr, get(harness.addr, "/api/analisis/analisis")).await;
    assert_eq!(status, 200);
    let analyses = analyses.as_array().expect("analyses array");
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0]["enfermedad_detectada"], "Breast Cancer");
    assert_eq!(analyses[0]["nombre_archivo"], "markers.csv");
    assert_eq!(analyses[0]["paciente_id"], harness.patient_id.get());
}

#[tokio::test]
async fn upload_without_mutations_reports_sentinel() {
    let harness = start(&[("Breast Cancer", "BRCA1, BRCA2")]).await;
    let csv = "posicion,gen,nucleotido,mutacion\n1,BRCA1,A,No\n";
    let patient = harness.patient_id.to_string();

    let (status, body) = send_raw(
        harness.addr,
        multipart_upload(harness.addr, Some(&patient), Some(csv)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["enfermedad_detectada"], NO_MATCHES);
    assert_eq!(body["mutaciones_detectadas"], serde_json::json!([]));
}

#[tokio::test]
async fn upload_without_file_is_bad_request() {
    let harness = start(&[]).await;
    let patient = harness.patient_id.to_string();

    let (status, body) =
        send_raw(harness.addr, multipart_upload(harness.addr, Some(&patient), None)).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (_, analyses) = send_raw(harness.addr, get(harness.addr, "/api/analisis/analisis")).await;
    assert_eq!(analyses, serde_json::json!([]));
}

#[tokio::test]
async fn upload_with_invalid_patient_id_is_bad_request() {
    let harness = start(&[]).await;
    let csv = "posicion,gen,nucleotido,mutacion\n1,BRCA1,A,Sí\n";

    let (status, _) =
        send_raw(harness.addr, multipart_upload(harness.addr, Some("abc"), Some(csv))).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let harness = start_with_limit(&[("Breast Cancer", "BRCA1")], 64).await;
    let mut csv = String::from("posicion,gen,nucleotido,mutacion\n");
    for position in 0..40 {
        csv.push_str(&format!("{position},BRCA1,A,Sí\n"));
    }
    let patient = harness.patient_id.to_string();

    let (status, body) = send_raw(
        harness.addr,
        multipart_upload(harness.addr, Some(&patient), Some(&csv)),
    )
    .await;
    assert_eq!(status, 413);
    assert!(body["error"].is_string());

    let (_, analyses) = send_raw(harness.addr, get(harness.addr, "/api/analisis/analisis")).await;
    assert_eq!(analyses, serde_json::json!([]));
}

#[tokio::test]
async fn patients_are_listed_per_technician() {
    let harness = start(&[]).await;

    let request = format!(
        "GET /api/pacientes HTTP/1.1\r\nHost: {}\r\nlaboratorista_id: 1\r\nConnection: close\r\n\r\n",
        harness.addr
    );
    let (status, body) = send_raw(harness.addr, request.into_bytes()).await;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["genero"], "M");

    let (status, _) = send_raw(harness.addr, get(harness.addr, "/api/pacientes")).await;
    assert_eq!(status, 400);

    let request = format!(
        "GET /api/pacientes/{} HTTP/1.1\r\nHost: {}\r\nlaboratorista_id: 2\r\nConnection: close\r\n\r\n",
        harness.patient_id, harness.addr
    );
    let (status, _) = send_raw(harness.addr, request.into_bytes()).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn patient_creation_validates_payload() {
    let harness = start(&[]).await;
    let post = |body: &str| {
        format!(
            "POST /api/pacientes HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            harness.addr,
            body.len()
        )
        .into_bytes()
    };

    let (status, body) = send_raw(
        harness.addr,
        post(r#"{"nombre":"Eva","apellido":"Sol","edad":31,"genero":"F","laboratorista_id":1}"#),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(body["nombre"], "Eva");

    let (status, _) = send_raw(harness.addr, post(r#"{"nombre":"Eva"}"#)).await;
    assert_eq!(status, 400);

    let (status, _) = send_raw(
        harness.addr,
        post(r#"{"nombre":"Eva","apellido":"Sol","edad":31,"genero":"F","laboratorista_id":9}"#),
    )
    .await;
    assert_eq!(status, 404);
}
