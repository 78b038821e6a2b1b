use crate::core::grid_resample::AlignedRaster;
use crate::types::{AlignError, AlignResult, EpsgCode, GeoTransform, ReferenceMetadata};
use chrono::NaiveDate;
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use std::path::{Path, PathBuf};

/// Index of the acquisition date among the underscore-separated name fields
const DATE_FIELD: usize = 3;

/// Fields of a canopy-height raster name: `{zone}_{x}_{y}_{date}[_...].tif`
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceName {
    pub directory: PathBuf,
    pub fields: Vec<String>,
    pub date: NaiveDate,
}

impl ReferenceName {
    pub fn parse<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AlignError::Configuration(format!("Bad file name {}", path.display())))?;

        let fields: Vec<String> = stem.split('_').map(str::to_string).collect();
        let date_field = fields.get(DATE_FIELD).ok_or_else(|| {
            AlignError::Configuration(format!("No date field in file name {}", stem))
        })?;
        let date = NaiveDate::parse_from_str(date_field, "%Y-%m-%d").map_err(|e| {
            AlignError::Configuration(format!("Bad date '{}' in {}: {}", date_field, stem, e))
        })?;

        Ok(Self {
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            fields,
            date,
        })
    }

    pub fn stem(&self) -> String {
        self.fields.join("_")
    }

    /// `{fields joined by "_"}_{acquisition_date}.tif` next to the reference
    pub fn composite_path(&self, acquisition_date: &str) -> PathBuf {
        self.directory
            .join(format!("{}_{}.tif", self.stem(), acquisition_date))
    }
}

/// Reader for the reference raster's grid description
pub struct ReferenceRaster;

impl ReferenceRaster {
    pub fn open<P: AsRef<Path>>(path: P) -> AlignResult<ReferenceMetadata> {
        log::info!("Reading reference raster: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        let spatial_ref = dataset.spatial_ref()?;
        let epsg = spatial_ref
            .auth_code()
            .ok()
            .and_then(|code| EpsgCode::try_from(code).ok());

        log::debug!("Reference size: {}x{}", width, height);
        log::debug!("Reference geotransform: {:?}", geo_transform);

        Ok(ReferenceMetadata {
            transform: GeoTransform::from_gdal(&geo_transform),
            crs_wkt: spatial_ref.to_wkt()?,
            epsg,
            width,
            height,
        })
    }
}

/// Write a band-sequential uint8 composite as a tiled, deflate-compressed GeoTIFF
pub fn write_composite<P: AsRef<Path>>(path: P, raster: &AlignedRaster) -> AlignResult<()> {
    let profile = &raster.profile;
    let (count, height, width) = raster.data.dim();
    if (count, height, width) != (profile.count, profile.height, profile.width) {
        return Err(AlignError::InvalidData(format!(
            "Array {:?} does not match profile {}x{}x{}",
            raster.data.dim(),
            profile.count,
            profile.height,
            profile.width
        )));
    }

    log::info!("Saving composite as GeoTIFF: {}", path.as_ref().display());

    let block_x = profile.block_x_size.to_string();
    let block_y = profile.block_y_size.to_string();
    let compress = profile.compress.to_uppercase();
    let interleave = profile.interleave.to_uppercase();
    let tiled = if profile.tiled { "YES" } else { "NO" };
    let options = [
        RasterCreationOption { key: "TILED", value: tiled },
        RasterCreationOption { key: "BLOCKXSIZE", value: &block_x },
        RasterCreationOption { key: "BLOCKYSIZE", value: &block_y },
        RasterCreationOption { key: "COMPRESS", value: &compress },
        RasterCreationOption { key: "INTERLEAVE", value: &interleave },
    ];

    let driver = DriverManager::get_driver_by_name(&profile.driver)?;
    let mut dataset = driver.create_with_band_type_with_options::<u8, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        count as isize,
        &options,
    )?;

    dataset.set_geo_transform(&profile.transform.to_gdal())?;
    if !profile.crs_wkt.is_empty() {
        dataset.set_spatial_ref(&SpatialRef::from_wkt(&profile.crs_wkt)?)?;
    }

    for band in 0..count {
        let mut rasterband = dataset.rasterband(band as isize + 1)?;
        let flat_data: Vec<u8> = raster.data.index_axis(ndarray::Axis(0), band).iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
    }

    Ok(())
}
