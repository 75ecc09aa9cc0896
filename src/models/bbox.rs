use serde::{Deserialize, Serialize};

const KM_PER_DEGREE: f64 = 111.0;

/// Axis-aligned lon/lat rectangle, serialized as `[west, south, east, north]`.
///
/// A box with `west > 0 && east < 0` crosses the antimeridian and is carried
/// verbatim through the whole pipeline — never normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BBox(pub [f64; 4]);

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Option<Self> {
        let b = BBox([west, south, east, north]);
        b.is_valid().then_some(b)
    }

    pub fn west(&self) -> f64 {
        self.0[0]
    }

    pub fn south(&self) -> f64 {
        self.0[1]
    }

    pub fn east(&self) -> f64 {
        self.0[2]
    }

    pub fn north(&self) -> f64 {
        self.0[3]
    }

    pub fn crosses_dateline(&self) -> bool {
        self.west() > 0.0 && self.east() < 0.0
    }

    /// Longitude/latitude bounds check plus ordering. Dateline-crossing
    /// boxes are valid even though west > east.
    pub fn is_valid(&self) -> bool {
        let [w, s, e, n] = self.0;
        let lon_ok = (-180.0..=180.0).contains(&w) && (-180.0..=180.0).contains(&e);
        let lat_ok = (-90.0..=90.0).contains(&s) && (-90.0..=90.0).contains(&n);
        let order_ok = (w < e || self.crosses_dateline()) && s < n;
        lon_ok && lat_ok && order_ok
    }

    pub fn center(&self) -> [f64; 2] {
        let lon = if self.crosses_dateline() {
            // Midpoint going eastward across the antimeridian
            let span = self.width_deg();
            let mut mid = self.west() + span / 2.0;
            if mid > 180.0 {
                mid -= 360.0;
            }
            mid
        } else {
            (self.west() + self.east()) / 2.0
        };
        [lon, (self.south() + self.north()) / 2.0]
    }

    pub fn width_deg(&self) -> f64 {
        if self.crosses_dateline() {
            (180.0 - self.west()) + (self.east() + 180.0)
        } else {
            self.east() - self.west()
        }
    }

    pub fn height_deg(&self) -> f64 {
        self.north() - self.south()
    }

    /// Approximate area in km², latitude-corrected at the box midpoint.
    pub fn area_km2(&self) -> f64 {
        let mid_lat = (self.south() + self.north()) / 2.0;
        let width_km = self.width_deg() * KM_PER_DEGREE * mid_lat.to_radians().cos();
        let height_km = self.height_deg() * KM_PER_DEGREE;
        (width_km * height_km).abs()
    }

    /// Longitude interval with a crossing box unwrapped past +180, so
    /// interval arithmetic works on the circle.
    fn lon_interval(&self) -> (f64, f64) {
        if self.crosses_dateline() {
            (self.west(), self.east() + 360.0)
        } else {
            (self.west(), self.east())
        }
    }

    /// Intersection area in square degrees. Correct for any mix of
    /// crossing and non-crossing boxes: the other interval is tried at
    /// ±360° shifts and the best alignment wins.
    pub fn intersection_deg2(&self, other: &BBox) -> f64 {
        let south = self.south().max(other.south());
        let north = self.north().min(other.north());
        if south >= north {
            return 0.0;
        }
        let (w1, e1) = self.lon_interval();
        let (w2, e2) = other.lon_interval();
        let mut width: f64 = 0.0;
        for shift in [-360.0, 0.0, 360.0] {
            let w = w1.max(w2 + shift);
            let e = e1.min(e2 + shift);
            if e > w {
                width = width.max(e - w);
            }
        }
        width * (north - south)
    }

    pub fn area_deg2(&self) -> f64 {
        self.width_deg() * self.height_deg()
    }

    /// Web-map zoom for framing this box. Larger spans zoom out.
    pub fn zoom_level(&self) -> u8 {
        let span = self.width_deg().max(self.height_deg());
        let zoom = if span >= 10.0 {
            6
        } else if span >= 5.0 {
            8
        } else if span >= 1.0 {
            10
        } else if span >= 0.5 {
            11
        } else if span >= 0.1 {
            12
        } else {
            14
        };
        zoom.clamp(3, 18)
    }

    /// Square box of `radius_miles` around a point, clamped to valid
    /// latitudes. Used for pin-dropped coordinates.
    pub fn around_point(lat: f64, lon: f64, radius_miles: f64) -> Option<Self> {
        let radius_km = radius_miles * 1.609_344;
        let dlat = radius_km / KM_PER_DEGREE;
        let dlon = radius_km / (KM_PER_DEGREE * lat.to_radians().cos().max(0.01));
        BBox::new(
            (lon - dlon).max(-180.0),
            (lat - dlat).max(-90.0),
            (lon + dlon).min(180.0),
            (lat + dlat).min(90.0),
        )
    }
}
