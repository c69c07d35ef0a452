//! Single-band GeoTIFF reading and writing.
//!
//! Only the subset of GeoTIFF needed for north-up rasters is handled:
//! ModelPixelScale + ModelTiepoint for the affine placement, the
//! GeoKeyDirectory for the EPSG code, and GDAL's ASCII no-data tag.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::crs::Crs;
use crate::error::{HabitatError, Result};
use crate::grid::Grid;
use crate::raster::{RasterLayer, DEFAULT_NODATA};

// GeoKey ids.
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Read a GeoTIFF file; the layer is named after the file stem.
pub fn read_geotiff(path: impl AsRef<Path>) -> Result<RasterLayer> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = File::open(path)?;
    read_geotiff_from(BufReader::new(file), name)
}

/// Read a GeoTIFF from any seekable reader.
pub fn read_geotiff_from<R: Read + Seek>(reader: R, name: impl Into<String>) -> Result<RasterLayer> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .ok_or_else(|| HabitatError::GeoTiff("missing ModelPixelScale tag".into()))?
        .into_f64_vec()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .ok_or_else(|| HabitatError::GeoTiff("missing ModelTiepoint tag".into()))?
        .into_f64_vec()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(HabitatError::GeoTiff("malformed georeferencing tags".into()));
    }
    let (sx, sy) = (scale[0], scale[1]);
    if (sx - sy).abs() > sx.abs() * 1e-9 {
        return Err(HabitatError::GeoTiff(format!("non-square pixels {sx} × {sy}")));
    }

    let crs = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(v) => epsg_from_geokeys(&v.into_u16_vec()?)
            .and_then(|code| Crs::from_epsg(u32::from(code)))
            .ok_or_else(|| HabitatError::GeoTiff("unsupported or missing EPSG code".into()))?,
        None => return Err(HabitatError::GeoTiff("missing GeoKeyDirectory tag".into())),
    };

    let nodata = match decoder.find_tag(Tag::GdalNodata)? {
        Some(v) => {
            let text = v.into_string()?;
            let text = text.trim_matches(char::from(0)).trim();
            text.parse::<f32>()
                .map_err(|_| HabitatError::GeoTiff(format!("unparseable GDAL_NODATA '{text}'")))?
        }
        None => DEFAULT_NODATA,
    };

    let data = to_f32(decoder.read_image()?)?;
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let grid = Grid::new(x - i * sx, y + j * sx, sx, height as usize, width as usize, crs)?;
    RasterLayer::from_vec(name, grid, data, nodata)
}

/// `(ProjectedCSType | GeographicType)` value from a GeoKeyDirectory.
fn epsg_from_geokeys(dir: &[u16]) -> Option<u16> {
    let count = usize::from(*dir.get(3)?);
    let keys = dir.get(4..4 + count * 4)?;
    let find = |id: u16| {
        keys.chunks_exact(4)
            .find(|k| k[0] == id && k[1] == 0)
            .map(|k| k[3])
    };
    find(PROJECTED_CS_TYPE).or_else(|| find(GEOGRAPHIC_TYPE))
}

fn to_f32(img: DecodingResult) -> Result<Vec<f32>> {
    Ok(match img {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(HabitatError::GeoTiff("unsupported sample format".into())),
    })
}

/// Write `layer` as a Float32 GeoTIFF with its sentinel in GDAL_NODATA.
pub fn write_geotiff(path: impl AsRef<Path>, layer: &RasterLayer) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut w = BufWriter::new(file);
    write_geotiff_to(&mut w, layer)?;
    w.flush()?;
    Ok(())
}

/// Write `layer` to any seekable writer.
pub fn write_geotiff_to<W: Write + Seek>(writer: W, layer: &RasterLayer) -> Result<()> {
    let grid = *layer.grid();
    let data: Vec<f32> = layer.values().map(|v| v.unwrap_or(layer.nodata)).collect();

    let (model_type, crs_key) = if grid.crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    let epsg = u16::try_from(grid.crs.epsg())
        .map_err(|_| HabitatError::GeoTiff(format!("{} does not fit a GeoKey", grid.crs)))?;
    let geokeys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, model_type,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, epsg,
    ];
    let scale = [grid.cell_size, grid.cell_size, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, grid.origin_x, grid.origin_y, 0.0];
    let nodata = format!("{}", layer.nodata);

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(grid.cols as u32, grid.rows as u32)?;
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])?;
    image.encoder().write_tag(Tag::GdalNodata, nodata.as_str())?;
    image.write_data(&data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_layer() -> RasterLayer {
        let grid = Grid::new(2_760_000.0, 1_190_000.0, 10.0, 3, 4, Crs::Lv95).unwrap();
        RasterLayer::from_fn("dem", grid, |r, c| (r != 1 || c != 2).then_some(1000.0 + (r * 4 + c) as f32))
    }

    #[test]
    fn written_geotiff_reads_back_with_grid_and_nodata() {
        let layer = sample_layer();
        let mut buf = Cursor::new(Vec::new());
        write_geotiff_to(&mut buf, &layer).unwrap();
        buf.set_position(0);

        let back = read_geotiff_from(buf, "dem").unwrap();
        assert_eq!(back.grid(), layer.grid());
        assert_eq!(back.nodata, DEFAULT_NODATA);
        assert_eq!(back.value(1, 2), None);
        assert_eq!(back.value(2, 3), Some(1011.0));
        assert_eq!(back.valid_count(), 11);
    }

    #[test]
    fn file_round_trip_uses_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elevation.tif");
        write_geotiff(&path, &sample_layer()).unwrap();
        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.name, "elevation");
        assert_eq!(back.grid().crs, Crs::Lv95);
    }

    #[test]
    fn integer_tiff_is_widened_to_f32() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            let mut image = encoder.new_image::<colortype::Gray8>(2, 2).unwrap();
            image.encoder().write_tag(Tag::ModelPixelScaleTag, &[25.0f64, 25.0, 0.0][..]).unwrap();
            image
                .encoder()
                .write_tag(Tag::ModelTiepointTag, &[0.0f64, 0.0, 0.0, 600_000.0, 200_000.0, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(Tag::GeoKeyDirectoryTag, &[1u16, 1, 0, 1, 3072, 0, 1, 21781][..])
                .unwrap();
            image.write_data(&[1u8, 4, 7, 9]).unwrap();
        }
        buf.set_position(0);
        let layer = read_geotiff_from(buf, "landcover").unwrap();
        assert_eq!(layer.grid().crs, Crs::Lv03);
        assert_eq!(layer.grid().cell_size, 25.0);
        assert_eq!(layer.raw(), &[1.0, 4.0, 7.0, 9.0]);
    }

    #[test]
    fn plain_tiff_without_georeferencing_is_rejected() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            encoder.write_image::<colortype::Gray32Float>(1, 1, &[0.5]).unwrap();
        }
        buf.set_position(0);
        assert!(matches!(read_geotiff_from(buf, "x"), Err(HabitatError::GeoTiff(_))));
    }
}
