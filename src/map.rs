//! Map decoding and coordinate transforms
//!
//! A map payload is base64 text wrapping a zlib stream wrapping a JSON
//! document. Inside, `MapData` is the packed bitmap, `PointData` the
//! cleaning path as little-endian `i16` pairs and `PointType` the 2-bit kind
//! of every path point.
//!
//! Two coordinate spaces are involved. *Virtual* coordinates are the robot's
//! own metric frame, used by rooms and the path. *Pixel* coordinates index
//! the rendered (upscaled) bitmap.

use crate::bitmap::{self, MapImage};
use crate::error::{Result, WebackError};
use crate::types::RoomId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;

/// Integer upscale factor applied to the bitmap for display
pub const DISPLAY_SCALE: u32 = 4;

/// Largest accepted bitmap side, in cells
const MAX_DIMENSION: f64 = 8192.0;

/// Point in the robot's frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtualPoint {
    pub x: f64,
    pub y: f64,
}

impl VirtualPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Point on the rendered map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// What the robot was doing when it passed a path point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Cleaning,
    Relocating,
    Unknown(u8),
}

impl PathKind {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => Self::Cleaning,
            0b01 => Self::Relocating,
            other => Self::Unknown(other),
        }
    }
}

/// One vertex of the rendered path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPoint {
    pub position: PixelPoint,
    pub kind: PathKind,
}

/// A room outline with its cleaning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,

    /// User-assigned name, the server does not always send it
    #[serde(default)]
    pub room_name: Option<String>,

    #[serde(default)]
    room_point_x: Vec<f64>,

    #[serde(default)]
    room_point_y: Vec<f64>,

    #[serde(default)]
    pub clean_order: i64,

    #[serde(default)]
    pub clean_times: i64,
}

impl Room {
    pub fn new(room_id: RoomId, room_name: Option<String>, outline: &[VirtualPoint]) -> Self {
        Self {
            room_id,
            room_name,
            room_point_x: outline.iter().map(|p| p.x).collect(),
            room_point_y: outline.iter().map(|p| p.y).collect(),
            clean_order: 0,
            clean_times: 1,
        }
    }

    pub fn id(&self) -> RoomId {
        self.room_id
    }

    pub fn name(&self) -> Option<&str> {
        self.room_name.as_deref()
    }

    /// Polygon vertices in virtual coordinates
    pub fn outline(&self) -> Vec<VirtualPoint> {
        self.room_point_x
            .iter()
            .zip(&self.room_point_y)
            .map(|(&x, &y)| VirtualPoint::new(x, y))
            .collect()
    }

    /// Center of the outline's bounding box, where the name label goes
    pub fn label_anchor(&self) -> Option<VirtualPoint> {
        let outline = self.outline();
        let first = outline.first()?;
        let (mut min, mut max) = (*first, *first);
        for point in &outline {
            min.x = min.x.min(point.x);
            min.y = min.y.min(point.y);
            max.x = max.x.max(point.x);
            max.y = max.y.max(point.y);
        }
        Some(VirtualPoint::new(
            min.x + (max.x - min.x) / 2.0,
            min.y + (max.y - min.y) / 2.0,
        ))
    }
}

/// Known virtual point and where it lands on the rendered map
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub vacuum: VirtualPoint,
    pub map: PixelPoint,
}

/// Room entry for room-selection UIs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSelection {
    pub id: RoomId,
    pub outline: Vec<VirtualPoint>,
    pub label: Option<String>,
    pub anchor: Option<VirtualPoint>,
}

#[derive(Deserialize)]
struct RawMap {
    #[serde(rename = "MapWidth", deserialize_with = "dimension")]
    width: u32,
    #[serde(rename = "MapHigh", deserialize_with = "dimension")]
    height: u32,
    #[serde(rename = "MapResolution")]
    resolution: f64,
    #[serde(rename = "MapOrigin")]
    origin: [f64; 2],
    #[serde(rename = "ChargerPoint", default)]
    charger: [f64; 2],
    #[serde(rename = "MapData")]
    map_data: String,
    #[serde(rename = "PointData", default)]
    point_data: Option<String>,
    #[serde(rename = "PointType", default)]
    point_type: Option<String>,
    #[serde(default)]
    room_zone_info: Vec<Room>,
}

fn dimension<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 || value > MAX_DIMENSION || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!("invalid map dimension {value}")));
    }
    Ok(value as u32)
}

fn decode_base64(field: &str, text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| WebackError::Decode(format!("{field} is not valid base64: {e}")))
}

/// Decoded floor plan
#[derive(Debug, Clone, PartialEq)]
pub struct MapDocument {
    width: u32,
    height: u32,
    resolution: f64,
    origin: [f64; 2],
    scale: u32,
    charger: [f64; 2],
    bitmap: Vec<u8>,
    path_data: Option<Vec<u8>>,
    path_types: Option<Vec<u8>>,
    rooms: Vec<Room>,
}

impl MapDocument {
    /// Decode a compressed map payload
    pub fn decode(payload: &str) -> Result<Self> {
        let compressed = decode_base64("map payload", payload)?;

        let mut json = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| WebackError::Decode(format!("map payload is not a zlib stream: {e}")))?;

        let raw: RawMap = serde_json::from_slice(&json)
            .map_err(|e| WebackError::Decode(format!("map document is invalid: {e}")))?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawMap) -> Result<Self> {
        if !(raw.resolution.is_finite() && raw.resolution > 0.0) {
            return Err(WebackError::Decode(format!("invalid map resolution {}", raw.resolution)));
        }

        let bitmap = decode_base64("MapData", &raw.map_data)?;
        let cells = raw.width as usize * raw.height as usize;
        if bitmap.len() * 4 < cells {
            return Err(WebackError::Decode(format!(
                "bitmap holds {} cells, map is {}x{}",
                bitmap.len() * 4,
                raw.width,
                raw.height
            )));
        }

        let path_data = raw
            .point_data
            .as_deref()
            .map(|data| decode_base64("PointData", data))
            .transpose()?;
        if let Some(data) = &path_data {
            if data.len() % 4 != 0 {
                return Err(WebackError::Decode(format!(
                    "path data length {} is not a whole number of points",
                    data.len()
                )));
            }
        }

        let path_types = raw
            .point_type
            .as_deref()
            .map(|data| decode_base64("PointType", data))
            .transpose()?;

        Ok(Self {
            width: raw.width,
            height: raw.height,
            resolution: raw.resolution,
            origin: raw.origin,
            scale: DISPLAY_SCALE,
            charger: raw.charger,
            bitmap,
            path_data,
            path_types,
            rooms: raw.room_zone_info,
        })
    }

    /// Replace this map with a newer payload, keeping room names
    ///
    /// The server drops custom room names on pushes, so names are carried
    /// over from the current rooms by id. Room order follows the new payload.
    /// On error the current map is left untouched.
    pub fn merge(&mut self, payload: &str) -> Result<()> {
        let mut next = Self::decode(payload)?;
        for room in &mut next.rooms {
            let previous_name = self
                .room(room.room_id)
                .and_then(|previous| previous.room_name.clone());
            if previous_name.is_some() {
                room.room_name = previous_name;
            }
        }
        *self = next;
        Ok(())
    }

    /// Width in map cells
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in map cells
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Meters per map cell
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn origin(&self) -> [f64; 2] {
        self.origin
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Packed 2-bit bitmap as received
    pub fn raw_bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    /// One 8-bit gray value per map cell
    pub fn grayscale(&self) -> Vec<u8> {
        let mut gray = bitmap::unpack(&self.bitmap);
        gray.truncate(self.width as usize * self.height as usize);
        gray
    }

    /// Colorized, upscaled map image
    pub fn render(&self) -> MapImage {
        MapImage::render(&self.grayscale(), self.width, self.height, self.scale)
    }

    pub fn virtual_to_pixel(&self, point: VirtualPoint) -> PixelPoint {
        let scale = f64::from(self.scale);
        PixelPoint::new(
            ((self.origin[0] + point.x * 2.0 * self.resolution) * scale).round() as i32,
            ((self.origin[1] + point.y * 2.0 * self.resolution) * scale).round() as i32,
        )
    }

    pub fn pixel_to_virtual(&self, point: PixelPoint) -> VirtualPoint {
        let scale = f64::from(self.scale);
        VirtualPoint::new(
            (f64::from(point.x) / scale - self.origin[0]) / self.resolution / 2.0,
            (f64::from(point.y) / scale - self.origin[1]) / self.resolution / 2.0,
        )
    }

    /// Charger location on the rendered map
    ///
    /// The charger is stored in cell units, so it only needs the origin
    /// offset and the display scale.
    pub fn charger_point_pixel(&self) -> PixelPoint {
        let scale = f64::from(self.scale);
        PixelPoint::new(
            ((self.charger[0] + self.origin[0]) * scale).round() as i32,
            ((self.charger[1] + self.origin[1]) * scale).round() as i32,
        )
    }

    pub fn charger_point_virtual(&self) -> VirtualPoint {
        self.pixel_to_virtual(self.charger_point_pixel())
    }

    /// Cleaning path, starting at the charger
    ///
    /// Empty when the payload carries no path. Points past the end of the
    /// type stream count as relocation.
    pub fn path(&self) -> Vec<PathPoint> {
        let Some(data) = &self.path_data else {
            return Vec::new();
        };

        let mut positions = Vec::with_capacity(data.len() / 4 + 1);
        positions.push(self.charger_point_pixel());
        for chunk in data.chunks_exact(4) {
            let x = i16::from_le_bytes([chunk[0], chunk[1]]);
            let y = i16::from_le_bytes([chunk[2], chunk[3]]);
            positions.push(self.virtual_to_pixel(VirtualPoint::new(f64::from(x), f64::from(y))));
        }

        let types = self.path_types.as_deref().unwrap_or_default();
        positions
            .into_iter()
            .enumerate()
            .map(|(i, position)| {
                let kind = match types.get(i / 4) {
                    Some(byte) => PathKind::from_bits((byte >> (6 - (i % 4) * 2)) & 0b11),
                    None => PathKind::Relocating,
                };
                PathPoint { position, kind }
            })
            .collect()
    }

    /// Last known robot position: the end of the path
    pub fn robot_position_pixel(&self) -> Option<PixelPoint> {
        self.path().last().map(|point| point.position)
    }

    pub fn robot_position_virtual(&self) -> Option<VirtualPoint> {
        self.robot_position_pixel()
            .map(|point| self.pixel_to_virtual(point))
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.room_id == id)
    }

    pub fn room_by_name(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.name() == Some(name))
    }

    /// Room outline on the rendered map
    pub fn room_outline_pixels(&self, room: &Room) -> Vec<PixelPoint> {
        room.outline()
            .into_iter()
            .map(|point| self.virtual_to_pixel(point))
            .collect()
    }

    /// Corner points tying virtual coordinates to the rendered map
    pub fn calibration_points(&self) -> Vec<CalibrationPoint> {
        let w = f64::from(self.width);
        let h = f64::from(self.height);
        [(0.0, 0.0), (w, h), (0.0, h), (w, 0.0)]
            .into_iter()
            .map(|(x, y)| {
                let vacuum = VirtualPoint::new(x, y);
                CalibrationPoint {
                    vacuum,
                    map: self.virtual_to_pixel(vacuum),
                }
            })
            .collect()
    }

    pub fn room_selections(&self) -> Vec<RoomSelection> {
        self.rooms
            .iter()
            .map(|room| RoomSelection {
                id: room.room_id,
                outline: room.outline(),
                label: room.room_name.clone(),
                anchor: room.label_anchor(),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use serde_json::{json, Value};
    use std::io::Write;

    /// Compress and encode a map document the way the cloud does
    pub(crate) fn encode_payload(document: &Value) -> String {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_vec(document).unwrap().as_slice())
            .unwrap();
        STANDARD.encode(encoder.finish().unwrap())
    }

    fn path_bytes(points: &[(i16, i16)]) -> Vec<u8> {
        points
            .iter()
            .flat_map(|(x, y)| x.to_le_bytes().into_iter().chain(y.to_le_bytes()))
            .collect()
    }

    pub(crate) fn sample_document(rooms: Value) -> Value {
        json!({
            "MapWidth": 4,
            "MapHigh": 2,
            "MapResolution": 0.05,
            "MapOrigin": [10.0, 20.0],
            "ChargerPoint": [0, 0],
            "MapData": STANDARD.encode([0xFFu8, 0x1B]),
            "PointData": STANDARD.encode(path_bytes(&[(10, 20), (30, 40)])),
            "PointType": STANDARD.encode([0b00_01_00_00u8]),
            "room_zone_info": rooms,
        })
    }

    fn sample() -> MapDocument {
        MapDocument::decode(&encode_payload(&sample_document(json!([
            {
                "room_id": 1,
                "room_name": "Kitchen",
                "room_point_x": [0, 100, 100, 0],
                "room_point_y": [0, 0, 50, 50],
                "clean_order": 1,
                "clean_times": 2
            },
            {
                "room_id": 2,
                "room_point_x": [-20, 20, 0],
                "room_point_y": [-10, -10, 30]
            }
        ]))))
        .unwrap()
    }

    #[test]
    fn decodes_header_and_bitmap() {
        let map = sample();
        assert_eq!(map.width(), 4);
        assert_eq!(map.height(), 2);
        assert_eq!(map.scale(), DISPLAY_SCALE);
        assert_eq!(map.grayscale(), vec![255, 255, 255, 255, 0, 85, 170, 255]);

        let image = map.render();
        assert_eq!(image.width(), 16);
        assert_eq!(image.height(), 8);
        assert_eq!(image.pixel(0, 0).unwrap()[3], 0);
        assert_eq!(image.pixel(0, 4).unwrap(), bitmap::colorize(0));
    }

    #[test]
    fn path_starts_at_charger() {
        let map = sample();
        let path = map.path();
        assert_eq!(path.len(), 3);

        // charger (0,0) + origin (10,20), times scale 4
        assert_eq!(path[0].position, PixelPoint::new(40, 80));
        // (10 + 2*10*0.05) * 4 = 44, (20 + 2*20*0.05) * 4 = 88
        assert_eq!(path[1].position, PixelPoint::new(44, 88));
        // (10 + 2*30*0.05) * 4 = 52, (20 + 2*40*0.05) * 4 = 96
        assert_eq!(path[2].position, PixelPoint::new(52, 96));

        assert_eq!(path[0].kind, PathKind::Cleaning);
        assert_eq!(path[1].kind, PathKind::Relocating);
        assert_eq!(path[2].kind, PathKind::Cleaning);
        assert_eq!(map.robot_position_pixel(), Some(PixelPoint::new(52, 96)));
    }

    #[test]
    fn short_type_stream_defaults_to_relocating() {
        let mut document = sample_document(json!([]));
        let points: Vec<(i16, i16)> = (0..6).map(|i| (i, i)).collect();
        document["PointData"] = json!(STANDARD.encode(path_bytes(&points)));
        document["PointType"] = json!(STANDARD.encode([0x00u8]));
        let map = MapDocument::decode(&encode_payload(&document)).unwrap();

        let kinds: Vec<PathKind> = map.path().iter().map(|p| p.kind).collect();
        assert_eq!(kinds.len(), 7);
        assert!(kinds[..4].iter().all(|k| *k == PathKind::Cleaning));
        assert!(kinds[4..].iter().all(|k| *k == PathKind::Relocating));
    }

    #[test]
    fn missing_path_is_empty() {
        let mut document = sample_document(json!([]));
        let object = document.as_object_mut().unwrap();
        object.remove("PointData");
        object.remove("PointType");
        let map = MapDocument::decode(&encode_payload(&document)).unwrap();
        assert!(map.path().is_empty());
        assert_eq!(map.robot_position_pixel(), None);
    }

    #[test]
    fn transforms_round_trip() {
        for (resolution, origin, scale) in [
            (0.05, [10.0, 20.0], 4),
            (0.1, [-3.5, 7.25], 4),
            (0.25, [0.0, 0.0], 2),
            (1.0, [100.0, -40.0], 1),
        ] {
            let map = MapDocument {
                resolution,
                origin,
                scale,
                ..sample()
            };
            let tolerance = 0.5 / (2.0 * resolution * f64::from(scale)) + 1e-9;
            for (x, y) in [(0.0, 0.0), (13.0, -7.0), (-250.0, 480.0), (1234.0, 5.0)] {
                let back = map.pixel_to_virtual(map.virtual_to_pixel(VirtualPoint::new(x, y)));
                assert!((back.x - x).abs() <= tolerance, "x {x} came back as {}", back.x);
                assert!((back.y - y).abs() <= tolerance, "y {y} came back as {}", back.y);
            }
        }
    }

    #[test]
    fn fine_grids_round_trip_within_one_unit() {
        let map = MapDocument {
            resolution: 0.1,
            ..sample()
        };
        for (x, y) in [(1.0, 2.0), (-17.0, 33.0), (999.0, -999.0)] {
            let back = map.pixel_to_virtual(map.virtual_to_pixel(VirtualPoint::new(x, y)));
            assert!((back.x - x).abs() <= 1.0);
            assert!((back.y - y).abs() <= 1.0);
        }
    }

    #[test]
    fn rooms_and_labels() {
        let map = sample();
        let kitchen = map.room_by_name("Kitchen").unwrap();
        assert_eq!(kitchen.id(), 1);
        assert_eq!(kitchen.clean_times, 2);
        assert_eq!(kitchen.label_anchor(), Some(VirtualPoint::new(50.0, 25.0)));

        let other = map.room(2).unwrap();
        assert_eq!(other.name(), None);
        assert_eq!(other.label_anchor(), Some(VirtualPoint::new(0.0, 10.0)));

        let outline = map.room_outline_pixels(kitchen);
        assert_eq!(outline[0], map.virtual_to_pixel(VirtualPoint::new(0.0, 0.0)));
        assert_eq!(outline.len(), 4);

        let selections = map.room_selections();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[0].label.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn calibration_covers_corners() {
        let map = sample();
        let points = map.calibration_points();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].vacuum, VirtualPoint::new(0.0, 0.0));
        assert_eq!(points[0].map, PixelPoint::new(40, 80));
        assert_eq!(points[1].vacuum, VirtualPoint::new(4.0, 2.0));
    }

    #[test]
    fn merge_keeps_room_names_and_new_order() {
        let mut map = sample();
        let update = encode_payload(&sample_document(json!([
            { "room_id": 2, "room_point_x": [0, 1], "room_point_y": [0, 1] },
            { "room_id": 1, "room_point_x": [0, 1], "room_point_y": [0, 1] },
            { "room_id": 3, "room_name": "Hall", "room_point_x": [0], "room_point_y": [0] }
        ])));

        map.merge(&update).unwrap();

        let ids: Vec<RoomId> = map.rooms().iter().map(Room::id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(map.room(1).unwrap().name(), Some("Kitchen"));
        assert_eq!(map.room(2).unwrap().name(), None);
        assert_eq!(map.room(3).unwrap().name(), Some("Hall"));
    }

    #[test]
    fn failed_merge_keeps_previous_map() {
        let mut map = sample();
        let before = map.clone();
        assert!(map.merge("%%% not base64").is_err());
        assert_eq!(map, before);
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        assert!(matches!(MapDocument::decode("!!!"), Err(WebackError::Decode(_))));
        assert!(matches!(
            MapDocument::decode(&STANDARD.encode(b"plain text")),
            Err(WebackError::Decode(_))
        ));

        let mut short_bitmap = sample_document(json!([]));
        short_bitmap["MapData"] = json!(STANDARD.encode([0xFFu8]));
        assert!(matches!(
            MapDocument::decode(&encode_payload(&short_bitmap)),
            Err(WebackError::Decode(_))
        ));

        let mut torn_path = sample_document(json!([]));
        torn_path["PointData"] = json!(STANDARD.encode([1u8, 0, 2]));
        assert!(matches!(
            MapDocument::decode(&encode_payload(&torn_path)),
            Err(WebackError::Decode(_))
        ));
    }
}
