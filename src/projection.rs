//! ETRS89 / UTM zone 33N (EPSG:25833) ⇄ geographic lon/lat (EPSG:4326).
//!
//! Transverse Mercator on the GRS80 ellipsoid using Krüger's series to
//! sixth order in the third flattening, which stays well below a
//! millimetre across the zone. ETRS89 and WGS84 are treated as identical.

/// GRS80 semi-major axis in metres.
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
/// GRS80 flattening.
const FLATTENING: f64 = 1.0 / 298.257_222_101;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
/// Zone 33 central meridian in degrees.
const CENTRAL_MERIDIAN: f64 = 15.0;

const MAX_LATITUDE: f64 = 84.0;
const MIN_LATITUDE: f64 = -80.0;
/// How far from the central meridian a longitude may lie.
const MAX_LONGITUDE_OFFSET: f64 = 15.0;
const MAX_EASTING_OFFSET: f64 = 1_000_000.0;
const MAX_NORTHING: f64 = 9_400_000.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("coordinate ({0}, {1}) is not a finite number")]
    NotFinite(f64, f64),
    #[error("latitude {0} is outside the supported range")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is too far from the zone 33 central meridian")]
    LongitudeOutOfRange(f64),
    #[error("easting {0} is outside zone 33")]
    EastingOutOfRange(f64),
    #[error("northing {0} is outside the northern hemisphere zone")]
    NorthingOutOfRange(f64),
}

/// Series coefficients derived from the ellipsoid.
struct Krueger {
    /// Rectifying radius times the scale factor.
    k0_a: f64,
    e: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    delta: [f64; 6],
}

impl Krueger {
    fn grs80() -> Self {
        let f = FLATTENING;
        let n = f / (2.0 - f);
        let (n2, n3) = (n * n, n * n * n);
        let (n4, n5, n6) = (n3 * n, n3 * n2, n3 * n3);

        let a = SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0 - 127.0 * n5 / 288.0
                + 7891.0 * n6 / 37800.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0 + 281.0 * n5 / 630.0
                - 1983433.0 * n6 / 1935360.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0 + 15061.0 * n5 / 26880.0
                + 167603.0 * n6 / 181440.0,
            49561.0 * n4 / 161280.0 - 179.0 * n5 / 168.0 + 6601661.0 * n6 / 7257600.0,
            34729.0 * n5 / 80640.0 - 3418889.0 * n6 / 1995840.0,
            212378941.0 * n6 / 319334400.0,
        ];

        let beta = [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0 - 81.0 * n5 / 512.0
                + 96199.0 * n6 / 604800.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0 + 46.0 * n5 / 105.0
                - 1118711.0 * n6 / 3870720.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0 - 209.0 * n5 / 4480.0 + 5569.0 * n6 / 90720.0,
            4397.0 * n4 / 161280.0 - 11.0 * n5 / 504.0 - 830251.0 * n6 / 7257600.0,
            4583.0 * n5 / 161280.0 - 108847.0 * n6 / 3991680.0,
            20648693.0 * n6 / 638668800.0,
        ];

        let delta = [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0 + 26.0 * n5 / 45.0
                - 2854.0 * n6 / 675.0,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0 + 2704.0 * n5 / 315.0
                + 2323.0 * n6 / 945.0,
            56.0 * n3 / 15.0 - 136.0 * n4 / 35.0 - 1262.0 * n5 / 105.0 + 73814.0 * n6 / 2835.0,
            4279.0 * n4 / 630.0 - 332.0 * n5 / 35.0 - 399572.0 * n6 / 14175.0,
            4174.0 * n5 / 315.0 - 144838.0 * n6 / 6237.0,
            601676.0 * n6 / 22275.0,
        ];

        Self {
            k0_a: SCALE_FACTOR * a,
            e: (f * (2.0 - f)).sqrt(),
            alpha,
            beta,
            delta,
        }
    }
}

/// Converts geographic `(lon, lat)` in degrees to `(easting, northing)` in metres.
pub fn wgs84_to_utm33(lon: f64, lat: f64) -> Result<(f64, f64), ProjectionError> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(ProjectionError::NotFinite(lon, lat));
    }
    if !(MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        return Err(ProjectionError::LatitudeOutOfRange(lat));
    }
    if (lon - CENTRAL_MERIDIAN).abs() > MAX_LONGITUDE_OFFSET {
        return Err(ProjectionError::LongitudeOutOfRange(lon));
    }

    let k = Krueger::grs80();
    let phi = lat.to_radians();
    let lambda = (lon - CENTRAL_MERIDIAN).to_radians();

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - k.e * (k.e * sin_phi).atanh()).sinh();
    let xi_prime = t.atan2(lambda.cos());
    let eta_prime = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_prime;
    let mut eta = eta_prime;
    for (j, a) in k.alpha.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi += a * (m * xi_prime).sin() * (m * eta_prime).cosh();
        eta += a * (m * xi_prime).cos() * (m * eta_prime).sinh();
    }

    Ok((FALSE_EASTING + k.k0_a * eta, k.k0_a * xi))
}

/// Converts `(easting, northing)` in metres to geographic `(lon, lat)` in degrees.
pub fn utm33_to_wgs84(easting: f64, northing: f64) -> Result<(f64, f64), ProjectionError> {
    if !easting.is_finite() || !northing.is_finite() {
        return Err(ProjectionError::NotFinite(easting, northing));
    }
    if (easting - FALSE_EASTING).abs() > MAX_EASTING_OFFSET {
        return Err(ProjectionError::EastingOutOfRange(easting));
    }
    if !(0.0..=MAX_NORTHING).contains(&northing) {
        return Err(ProjectionError::NorthingOutOfRange(northing));
    }

    let k = Krueger::grs80();
    let xi = northing / k.k0_a;
    let eta = (easting - FALSE_EASTING) / k.k0_a;

    let mut xi_prime = xi;
    let mut eta_prime = eta;
    for (j, b) in k.beta.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi_prime -= b * (m * xi).sin() * (m * eta).cosh();
        eta_prime -= b * (m * xi).cos() * (m * eta).sinh();
    }

    let chi = (xi_prime.sin() / eta_prime.cosh()).asin();
    let mut phi = chi;
    for (j, d) in k.delta.iter().enumerate() {
        phi += d * (2.0 * (j + 1) as f64 * chi).sin();
    }
    let lambda = eta_prime.sinh().atan2(xi_prime.cos());

    let lat = phi.to_degrees();
    let lon = CENTRAL_MERIDIAN + lambda.to_degrees();
    if lat > MAX_LATITUDE {
        return Err(ProjectionError::NorthingOutOfRange(northing));
    }

    Ok((normalize_longitude(lon), lat))
}

fn normalize_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}
