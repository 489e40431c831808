use std::io::Cursor;
use std::sync::Arc;

use chrono::NaiveDate;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use tillscan_core::FieldValue;
use tillscan_ocr::{
    Consistency, DecodeError, MediaType, MockRecognizer, PipelineConfig, RawDocument, ReceiptPipeline,
    StaticRasterizer,
};

const RECEIPT: &str = "Receipt #A1234\nDate: 03/12/2024\nTotal: $15.00\nCash: $20.00\nChange: $5.00";

fn receipt_photo() -> Vec<u8> {
    // Off-white paper with a few dark bars standing in for printed lines.
    let img: GrayImage = ImageBuffer::from_fn(200, 120, |x, y| {
        let on_line = (20..100).contains(&x) && (y % 20) < 4 && y > 10 && y < 110;
        Luma([if on_line { 30 } else { 225 }])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn pipeline(text: &str) -> ReceiptPipeline<MockRecognizer> {
    ReceiptPipeline::new(MockRecognizer::new(text), &PipelineConfig::default())
        .unwrap()
        .with_reference_date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
}

#[tokio::test]
async fn receipt_photo_yields_all_fields() {
    let doc = RawDocument::new(receipt_photo(), MediaType::Image("png".into()));
    let result = pipeline(RECEIPT).run(doc).await.unwrap();

    let expect = [
        ("receipt_id", "A1234"),
        ("date", "2024-03-12"),
        ("total", "15.00"),
        ("change", "5.00"),
    ];
    for (field, value) in expect {
        let outcome = result.field(field).unwrap();
        assert!(outcome.found, "{field} not found");
        assert_eq!(outcome.value.as_deref(), Some(value), "{field}");
    }
    assert_eq!(
        result.value_of("date"),
        Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()))
    );
    assert_eq!(result.consistency, Consistency::Consistent);
    assert!(result.missing_fields.is_empty());
    assert!(!result.needs_review());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["fields"]["total"]["value"], "15.00");
    assert_eq!(json["fields"]["total"]["found"], true);
    assert!(json["fields"].get("payment").is_none());
    assert_eq!(json["consistency"]["status"], "consistent");
}

#[tokio::test]
async fn multi_page_pdf_prefers_first_page() {
    let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([255])));
    let p = pipeline("Total: $15.00")
        .with_rasterizer(Arc::new(StaticRasterizer::new(vec![blank.clone(), blank])));
    let result = p.run(RawDocument::new(b"%PDF-1.7".to_vec(), MediaType::Pdf)).await.unwrap();
    let total = result.field("total").unwrap();
    assert_eq!(total.candidate.as_ref().unwrap().page_index, 0);
    assert_eq!(result.missing_fields, vec!["receipt_id", "date", "change"]);
}

#[tokio::test]
async fn undecodable_document_has_no_result() {
    let doc = RawDocument::new(vec![0u8; 64], MediaType::Image("jpeg".into()));
    let err = pipeline(RECEIPT).run(doc).await.unwrap_err();
    assert!(matches!(err, DecodeError::Image(_)), "got {err:?}");
}
