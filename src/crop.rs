use crate::error::CmipError;
use crate::region::{BoundingBox, Region, normalize_lon, point_in_polygon};

/// Rectilinear gridded data: `frames` leading slices (usually time steps)
/// over a lat x lon grid, values in row-major (frame, lat, lon) order.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub frames: usize,
    pub values: Vec<f64>,
}

impl Grid {
    pub fn new(
        lats: Vec<f64>,
        lons: Vec<f64>,
        frames: usize,
        values: Vec<f64>,
    ) -> Result<Grid, CmipError> {
        let expected = frames * lats.len() * lons.len();
        if values.len() != expected {
            return Err(CmipError::InvalidGrid(format!(
                "expected {expected} values for {} frames x {} lats x {} lons, got {}",
                frames,
                lats.len(),
                lons.len(),
                values.len()
            )));
        }
        Ok(Grid {
            lats,
            lons,
            frames,
            values,
        })
    }

    pub fn value(&self, frame: usize, lat_index: usize, lon_index: usize) -> f64 {
        self.values[(frame * self.lats.len() + lat_index) * self.lons.len() + lon_index]
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty() || self.lons.is_empty()
    }
}

/// Crops a grid to the region polygon. Grid and polygon longitudes are first
/// normalized to -180..180. Step 1 keeps only points inside the polygon's
/// bounding box (inclusive); step 2 ray-casts each remaining point. Rows and
/// columns with no inside point are dropped, so the result's extent shrinks
/// to the polygon footprint; surviving cells outside the polygon are NaN.
pub fn crop_grid(grid: &Grid, region: &Region) -> Result<Grid, CmipError> {
    let polygon = region.normalized_polygon();
    let bbox = BoundingBox::of(&polygon)
        .ok_or_else(|| CmipError::InvalidRegion("empty polygon".to_string()))?;

    let lons: Vec<f64> = grid.lons.iter().map(|&lon| normalize_lon(lon)).collect();

    let lat_candidates: Vec<usize> = (0..grid.lats.len())
        .filter(|&i| grid.lats[i] >= bbox.min_lat && grid.lats[i] <= bbox.max_lat)
        .collect();
    let lon_candidates: Vec<usize> = (0..lons.len())
        .filter(|&j| lons[j] >= bbox.min_lon && lons[j] <= bbox.max_lon)
        .collect();

    // Membership mask over the bounding-box subset only.
    let mut mask = vec![false; lat_candidates.len() * lon_candidates.len()];
    for (mi, &i) in lat_candidates.iter().enumerate() {
        for (mj, &j) in lon_candidates.iter().enumerate() {
            mask[mi * lon_candidates.len() + mj] = point_in_polygon(lons[j], grid.lats[i], &polygon);
        }
    }

    let kept_rows: Vec<usize> = (0..lat_candidates.len())
        .filter(|&mi| (0..lon_candidates.len()).any(|mj| mask[mi * lon_candidates.len() + mj]))
        .collect();
    let kept_cols: Vec<usize> = (0..lon_candidates.len())
        .filter(|&mj| (0..lat_candidates.len()).any(|mi| mask[mi * lon_candidates.len() + mj]))
        .collect();

    let out_lats: Vec<f64> = kept_rows
        .iter()
        .map(|&mi| grid.lats[lat_candidates[mi]])
        .collect();
    let out_lons: Vec<f64> = kept_cols
        .iter()
        .map(|&mj| lons[lon_candidates[mj]])
        .collect();

    let mut values = Vec::with_capacity(grid.frames * out_lats.len() * out_lons.len());
    for frame in 0..grid.frames {
        for &mi in &kept_rows {
            for &mj in &kept_cols {
                if mask[mi * lon_candidates.len() + mj] {
                    values.push(grid.value(frame, lat_candidates[mi], lon_candidates[mj]));
                } else {
                    values.push(f64::NAN);
                }
            }
        }
    }

    Grid::new(out_lats, out_lons, grid.frames, values)
}

#[cfg(feature = "netcdf")]
pub use self::io::crop_file;

#[cfg(feature = "netcdf")]
mod io {
    use std::path::Path;

    use super::{Grid, crop_grid};
    use crate::error::CmipError;
    use crate::region::Region;

    const LAT_NAMES: [&str; 2] = ["lat", "latitude"];
    const LON_NAMES: [&str; 2] = ["lon", "longitude"];

    /// Opens a downloaded NetCDF file, crops `variable` to the region, and
    /// writes the cropped dataset to `destination`.
    pub fn crop_file(
        source: &Path,
        destination: &Path,
        region: &Region,
        variable: &str,
    ) -> Result<(), CmipError> {
        let file = netcdf::open(source).map_err(|err| CmipError::Crop(err.to_string()))?;

        let (lat_name, lats) = read_axis(&file, &LAT_NAMES)?;
        let (lon_name, lons) = read_axis(&file, &LON_NAMES)?;
        let var = file
            .variable(variable)
            .ok_or_else(|| CmipError::Crop(format!("variable `{variable}` not found")))?;

        let dims: Vec<usize> = var.dimensions().iter().map(|dim| dim.len()).collect();
        let cells = lats.len() * lons.len();
        if cells == 0 || dims.iter().product::<usize>() % cells != 0 {
            return Err(CmipError::Crop(format!(
                "variable `{variable}` shape {dims:?} does not end in ({} x {})",
                lats.len(),
                lons.len()
            )));
        }
        let values = var
            .get_values::<f64, _>(..)
            .map_err(|err| CmipError::Crop(err.to_string()))?;
        let frames = values.len() / cells;

        let grid = Grid::new(lats, lons, frames, values)?;
        let cropped = crop_grid(&grid, region)?;
        if cropped.is_empty() {
            return Err(CmipError::Crop(format!(
                "region `{}` does not intersect the grid",
                region.name
            )));
        }

        let time = read_time(&file, frames);
        drop(file);

        write_cropped(
            destination,
            &cropped,
            variable,
            &lat_name,
            &lon_name,
            time.as_deref(),
        )
    }

    fn read_axis(file: &netcdf::File, names: &[&str]) -> Result<(String, Vec<f64>), CmipError> {
        for name in names {
            if let Some(var) = file.variable(name) {
                let values = var
                    .get_values::<f64, _>(..)
                    .map_err(|err| CmipError::Crop(err.to_string()))?;
                return Ok((name.to_string(), values));
            }
        }
        Err(CmipError::Crop(format!(
            "no coordinate variable named one of {names:?}"
        )))
    }

    fn read_time(file: &netcdf::File, frames: usize) -> Option<Vec<f64>> {
        let var = file.variable("time")?;
        let values = var.get_values::<f64, _>(..).ok()?;
        (values.len() == frames).then_some(values)
    }

    fn write_cropped(
        destination: &Path,
        grid: &Grid,
        variable: &str,
        lat_name: &str,
        lon_name: &str,
        time: Option<&[f64]>,
    ) -> Result<(), CmipError> {
        let mut file =
            netcdf::create(destination).map_err(|err| CmipError::Crop(err.to_string()))?;

        file.add_dimension(lat_name, grid.lats.len())
            .map_err(|err| CmipError::Crop(err.to_string()))?;
        file.add_dimension(lon_name, grid.lons.len())
            .map_err(|err| CmipError::Crop(err.to_string()))?;

        let mut dims: Vec<&str> = Vec::new();
        if grid.frames > 1 || time.is_some() {
            file.add_dimension("time", grid.frames)
                .map_err(|err| CmipError::Crop(err.to_string()))?;
            dims.push("time");
        }
        dims.push(lat_name);
        dims.push(lon_name);

        let mut lat_var = file
            .add_variable::<f64>(lat_name, &[lat_name])
            .map_err(|err| CmipError::Crop(err.to_string()))?;
        lat_var
            .put_values(&grid.lats, ..)
            .map_err(|err| CmipError::Crop(err.to_string()))?;

        let mut lon_var = file
            .add_variable::<f64>(lon_name, &[lon_name])
            .map_err(|err| CmipError::Crop(err.to_string()))?;
        lon_var
            .put_values(&grid.lons, ..)
            .map_err(|err| CmipError::Crop(err.to_string()))?;

        if let Some(time_values) = time {
            let mut time_var = file
                .add_variable::<f64>("time", &["time"])
                .map_err(|err| CmipError::Crop(err.to_string()))?;
            time_var
                .put_values(time_values, ..)
                .map_err(|err| CmipError::Crop(err.to_string()))?;
        }

        let mut data_var = file
            .add_variable::<f64>(variable, &dims)
            .map_err(|err| CmipError::Crop(err.to_string()))?;
        data_var
            .put_values(&grid.values, ..)
            .map_err(|err| CmipError::Crop(err.to_string()))?;

        Ok(())
    }
}
