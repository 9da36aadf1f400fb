use crate::resolve::{ClassResolution, ClassResolver};
use crate::types::AnnotationRecord;

/// Calculate the normalized YOLO box `(x_center, y_center, width, height)`
pub fn calculate_bounding_box(record: &AnnotationRecord) -> (f64, f64, f64, f64) {
    let box_width = record.max_x - record.min_x;
    let box_height = record.max_y - record.min_y;
    let x_center = record.min_x + box_width / 2.0;
    let y_center = record.min_y + box_height / 2.0;

    let image_width = f64::from(record.image_width);
    let image_height = f64::from(record.image_height);

    (
        x_center / image_width,
        y_center / image_height,
        box_width / image_width,
        box_height / image_height,
    )
}

/// Encode one record as a YOLO bbox line, or `None` when its class is unresolved
pub fn encode_label_line(record: &AnnotationRecord, resolution: ClassResolution) -> Option<String> {
    let class_id = resolution.index()?;
    let (x_center, y_center, width, height) = calculate_bounding_box(record);

    Some(format!(
        "{} {:.6} {:.6} {:.6} {:.6}",
        class_id, x_center, y_center, width, height
    ))
}

/// Label lines for the records of one image, in record order.
///
/// Returns the lines and the number of records that could not be resolved.
pub fn convert_to_yolo_format(
    records: &[AnnotationRecord],
    resolver: &ClassResolver,
) -> (Vec<String>, usize) {
    let mut lines = Vec::with_capacity(records.len());
    let mut unresolved = 0;

    for record in records {
        match encode_label_line(record, resolver.resolve(record)) {
            Some(line) => lines.push(line),
            None => unresolved += 1,
        }
    }

    (lines, unresolved)
}

/// Label file body: every line followed by a newline
pub fn label_file_content(lines: &[String]) -> String {
    let mut yolo_data = String::with_capacity(lines.len() * 48);
    for line in lines {
        yolo_data.push_str(line);
        yolo_data.push('\n');
    }
    yolo_data
}
