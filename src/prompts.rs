//! Prompts sent to the language model.
//!
//! Centralising every prompt here means changing what the model is asked
//! requires editing exactly one place, and unit tests can inspect prompts
//! without a live provider.
//!
//! Templates carry a `{ocr_text}` placeholder that is substituted verbatim;
//! braces in the JSON skeletons are literal.

use crate::document::DocumentType;
use crate::error::FieldError;

/// Appended by [`crate::pipeline::llm::LlmClient::generate_json`] to every
/// JSON-expecting prompt.
pub const JSON_ONLY_SUFFIX: &str = "\n\nRespond ONLY with a valid JSON object. Do not add any text before or after the JSON.";

/// Header of the corrective block added to an extraction prompt after a
/// failed attempt.
pub const FEEDBACK_HEADER: &str = "ATTENTION: previous attempt had these errors:";

// ── Classification ───────────────────────────────────────────────────────

pub const CLASSIFICATION_SYSTEM_PROMPT: &str = "You are an expert in classifying logistics documents. \
Your task is to analyse text extracted by OCR from a Spanish logistics document and determine its type.";

const CLASSIFICATION_TEMPLATE: &str = r#"Analyse the following text extracted from a logistics document and classify its type.

VALID TYPES:
1. ALBARAN - delivery note (albarán de entrega)
2. ORDEN_ENVIO - shipping order or picking list (orden de envío)
3. NOTA_RECEPCION - goods-received note (nota de recepción)
4. PARTE_TRANSPORTE - transport sheet or CMR (parte de transporte)

DOCUMENT TEXT:
{ocr_text}

Answer with a JSON object in exactly this shape:
{
    "document_type": "TYPE",
    "confidence": 0.95,
    "reasoning": "One sentence explaining the choice"
}

document_type must be exactly one of: ALBARAN, ORDEN_ENVIO, NOTA_RECEPCION, PARTE_TRANSPORTE"#;

/// Classification prompt for (already truncated) OCR text.
pub fn classification_prompt(ocr_text: &str) -> String {
    CLASSIFICATION_TEMPLATE.replace("{ocr_text}", ocr_text)
}

// ── Extraction ───────────────────────────────────────────────────────────

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert in extracting data from logistics documents. \
Extract structured fields precisely. If a field is not present in the document, use null.";

const ALBARAN_TEMPLATE: &str = r#"Extract the following fields from this delivery note (albarán).

DOCUMENT TEXT:
{ocr_text}

Return the fields as JSON:
{
    "numero_albaran": "Delivery note number (pattern ALB-YYYYMMDD)",
    "fecha_emision": "Issue date, YYYY-MM-DD",
    "proveedor": {
        "razon_social": "Supplier legal name",
        "cif": "Supplier tax id",
        "direccion": "Supplier address"
    },
    "cliente": {
        "razon_social": "Customer legal name",
        "cif": "Customer tax id",
        "direccion_entrega": "Delivery address"
    },
    "productos": [
        {
            "codigo_producto": "Product code",
            "descripcion": "Product description",
            "cantidad": 0,
            "precio_unitario": 0.0,
            "subtotal": 0.0
        }
    ],
    "total": 0.0,
    "firma_transportista": false,
    "sello_empresa": false,
    "observaciones": "Remarks, if any"
}

IMPORTANT:
- use null for fields you cannot find
- cantidad is an integer; prices and totals are decimals
- dates are YYYY-MM-DD
- firma_transportista and sello_empresa are booleans"#;

const ORDEN_ENVIO_TEMPLATE: &str = r#"Extract the following fields from this shipping order (orden de envío).

DOCUMENT TEXT:
{ocr_text}

Return the fields as JSON:
{
    "numero_orden": "Order number (pattern ORD-YYYYMMDD)",
    "fecha_orden": "Order date, YYYY-MM-DD",
    "fecha_envio_programada": "Scheduled shipping date, YYYY-MM-DD",
    "origen": {
        "ubicacion": "Origin warehouse or location",
        "direccion": "Full address",
        "codigo_postal": "Postal code"
    },
    "destino": {
        "ubicacion": "Destination customer or location",
        "direccion": "Delivery address",
        "codigo_postal": "Postal code"
    },
    "productos": [
        {
            "codigo": "Product code",
            "descripcion": "Description",
            "cantidad_ordenada": 0,
            "ubicacion_almacen": "Warehouse bin"
        }
    ],
    "transportista": "Carrier name",
    "instrucciones_especiales": "Special instructions"
}"#;

const NOTA_RECEPCION_TEMPLATE: &str = r#"Extract the following fields from this goods-received note (nota de recepción).

DOCUMENT TEXT:
{ocr_text}

Return the fields as JSON:
{
    "numero_recepcion": "Receipt number (pattern REC-YYYYMMDD)",
    "fecha_recepcion": "Receipt date, YYYY-MM-DD",
    "referencia_pedido": "Original purchase order number",
    "referencia_albaran": "Related delivery note number",
    "proveedor": "Supplier name",
    "productos_recibidos": [
        {
            "codigo": "Product code",
            "descripcion": "Description",
            "cantidad_esperada": 0,
            "cantidad_recibida": 0,
            "estado": "correcto | danado | faltante",
            "observaciones": "Item remarks"
        }
    ],
    "discrepancias": false,
    "firma_receptor": false,
    "observaciones_calidad": "General quality remarks"
}

estado must be exactly one of: correcto, danado, faltante"#;

const PARTE_TRANSPORTE_TEMPLATE: &str = r#"Extract the following fields from this transport sheet (parte de transporte).

DOCUMENT TEXT:
{ocr_text}

Return the fields as JSON:
{
    "numero_parte": "Sheet number (pattern PT-YYYYMMDD)",
    "fecha_salida": "Departure date and time, YYYY-MM-DD HH:MM",
    "fecha_llegada_estimada": "Estimated arrival date and time, YYYY-MM-DD HH:MM",
    "matricula_vehiculo": "Licence plate (pattern 1234-ABC)",
    "conductor": {
        "nombre": "Driver name",
        "dni": "Driver national id",
        "licencia": "Licence number"
    },
    "origen": {
        "ubicacion": "Origin",
        "codigo_postal": "Postal code"
    },
    "destino": {
        "ubicacion": "Destination",
        "codigo_postal": "Postal code"
    },
    "carga": [
        {
            "numero_albaran": "Delivery note number",
            "bultos": 0,
            "peso_kg": 0.0
        }
    ],
    "kilometraje_inicial": 0,
    "kilometraje_final": null,
    "firma_origen": false,
    "firma_destino": null,
    "incidencias": "Incidents during transport"
}"#;

/// The extraction template for `doc_type`, with its `{ocr_text}` placeholder.
pub fn extraction_template(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::Albaran => ALBARAN_TEMPLATE,
        DocumentType::OrdenEnvio => ORDEN_ENVIO_TEMPLATE,
        DocumentType::NotaRecepcion => NOTA_RECEPCION_TEMPLATE,
        DocumentType::ParteTransporte => PARTE_TRANSPORTE_TEMPLATE,
    }
}

/// Render one corrective block listing the errors of a failed attempt.
pub fn feedback_block(errors: &[FieldError]) -> String {
    let mut block = format!("\n\n{FEEDBACK_HEADER}\n");
    for e in errors {
        block.push_str(&e.to_string());
        block.push('\n');
    }
    block.push_str("Please correct these errors and extract the data again.");
    block
}

/// Build the extraction prompt for one attempt.
///
/// `prior_errors` holds one entry per earlier failed attempt, oldest first;
/// each becomes a corrective block appended to the base prompt.
pub fn extraction_prompt(
    doc_type: DocumentType,
    ocr_text: &str,
    prior_errors: &[Vec<FieldError>],
) -> String {
    let mut prompt = extraction_template(doc_type).replace("{ocr_text}", ocr_text);
    for errors in prior_errors {
        prompt.push_str(&feedback_block(errors));
    }
    prompt
}

// ── Vision OCR ───────────────────────────────────────────────────────────

pub const VISION_OCR_SYSTEM_PROMPT: &str = "You are a precise OCR engine. \
You transcribe every piece of text visible in a scanned document image, line by line, in reading order. \
You never invent, translate or correct text.";

/// Instruction sent with the page image. `{width}` and `{height}` are the
/// pixel dimensions of that image.
const VISION_OCR_TEMPLATE: &str = r#"Transcribe all text in this {width}x{height} pixel image.

Return one JSON object:
{
    "lines": [
        { "text": "line text", "box": [x1, y1, x2, y2], "confidence": 0.97 }
    ]
}

Rules:
- one entry per visual line, top to bottom, left to right
- "box" is the pixel rectangle of the line; a four-point polygon [[x,y],[x,y],[x,y],[x,y]] is also accepted
- "confidence" is your certainty from 0 to 1
- omit empty lines"#;

pub fn vision_ocr_prompt(width: u32, height: u32) -> String {
    VISION_OCR_TEMPLATE
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
}
