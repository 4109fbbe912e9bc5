//! Seeded synthetic listings shaped like the canonical training table.

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{
    error::TableError,
    table::{Column, Table},
    UNKNOWN_CATEGORY,
};

/// Districts drawn uniformly for synthetic rows.
pub const DISTRICTS: [&str; 37] = [
    "Södermalm",
    "Kungsholmen",
    "Vasastan",
    "Östermalm",
    "Norrmalm",
    "Bromma",
    "Hägersten-Liljeholmen",
    "Enskede-Årsta-Vantör",
    "Farsta",
    "Skärholmen",
    "Spånga-Tensta",
    "Rinkeby-Kista",
    "Älvsjö",
    "Skarpnäck",
    "Stockholm",
    "Solna",
    "Sundbyberg",
    "Nacka",
    "Lidingö",
    "Täby",
    "Danderyd",
    "Järfälla",
    "Sollentuna",
    "Upplands Väsby",
    "Vallentuna",
    "Värmdö",
    "Tyresö",
    "Haninge",
    "Huddinge",
    "Botkyrka",
    "Salem",
    "Ekerö",
    "Sigtuna",
    "Nynäshamn",
    "Vaxholm",
    "Österåker",
    UNKNOWN_CATEGORY,
];

const BASE_PRICE: f64 = 45_000.0;
const PRICE_FLOOR: f64 = 25_000.0;
const PRICE_CEILING: f64 = 140_000.0;

fn district_premium(district: &str) -> f64 {
    match district {
        "Östermalm" => 35_000.0,
        "Södermalm" => 20_000.0,
        "Vasastan" => 18_000.0,
        "Kungsholmen" => 15_000.0,
        _ => 0.0,
    }
}

fn normal(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z.mul_add(std_dev, mean)
}

/// Generates `rows` listings; the same seed always yields the same table.
///
/// Columns follow the canonical order and add `total_price`.
pub fn synthesize(rows: usize, seed: u64) -> Result<Table, TableError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut area = Vec::with_capacity(rows);
    let mut rooms = Vec::with_capacity(rows);
    let mut district = Vec::with_capacity(rows);
    let mut year_built = Vec::with_capacity(rows);
    let mut monthly_fee = Vec::with_capacity(rows);
    let mut transaction_year = Vec::with_capacity(rows);
    let mut price_per_sqm = Vec::with_capacity(rows);
    let mut total_price = Vec::with_capacity(rows);

    for _ in 0..rows {
        let a: f64 = rng.gen_range(20.0..300.0);
        let r = normal(&mut rng, 2.6, 1.2).clamp(1.0, 10.0);
        let built = f64::from(rng.gen_range(1850_i32..2025));
        let fee = normal(&mut rng, 3500.0, 1600.0).clamp(0.0, 20_000.0);
        let sold = f64::from(rng.gen_range(2000_i32..2025));
        let name = DISTRICTS[rng.gen_range(0..DISTRICTS.len())];

        let age_penalty = ((2026.0 - built) * 70.0).clamp(0.0, 12_000.0);
        let fee_penalty = (fee - 2500.0) * 1.2;
        let year_trend = (sold - 2015.0) * 900.0;
        let size_effect = ((a - 60.0) * -18.0).clamp(-3500.0, 2500.0);
        let room_effect = ((r - 2.5) * 650.0).clamp(-2500.0, 4500.0);
        let noise = normal(&mut rng, 0.0, 4000.0);
        let per_sqm = (BASE_PRICE + district_premium(name) + year_trend + size_effect + room_effect
            - age_penalty
            - fee_penalty
            + noise)
            .clamp(PRICE_FLOOR, PRICE_CEILING);

        area.push(Some(a));
        rooms.push(Some(r));
        district.push(Some(name.to_string()));
        year_built.push(Some(built));
        monthly_fee.push(Some(fee));
        transaction_year.push(Some(sold));
        price_per_sqm.push(Some(per_sqm));
        total_price.push(Some(per_sqm * a));
    }

    Table::from_columns([
        ("area", Column::Number(area)),
        ("rooms", Column::Number(rooms)),
        ("district", Column::Text(district)),
        ("year_built", Column::Number(year_built)),
        ("monthly_fee", Column::Number(monthly_fee)),
        ("transaction_year", Column::Number(transaction_year)),
        ("price_per_sqm", Column::Number(price_per_sqm)),
        ("total_price", Column::Number(total_price)),
    ])
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn same_seed_same_rows() {
        assert_eq!(synthesize(50, 7).unwrap(), synthesize(50, 7).unwrap());
        assert_ne!(synthesize(50, 7).unwrap(), synthesize(50, 8).unwrap());
    }

    #[test]
    fn values_stay_in_documented_ranges() {
        let table = synthesize(500, 42).unwrap();
        assert_eq!(table.height(), 500);
        let col = |name: &str| table.column(name).unwrap().to_numbers();
        let (area, rooms, fee, price, total) = (
            col("area"),
            col("rooms"),
            col("monthly_fee"),
            col("price_per_sqm"),
            col("total_price"),
        );
        for row in 0..table.height() {
            let a = area[row].unwrap();
            assert!((20.0..300.0).contains(&a));
            assert!((1.0..=10.0).contains(&rooms[row].unwrap()));
            assert!((0.0..=20_000.0).contains(&fee[row].unwrap()));
            let p = price[row].unwrap();
            assert!((PRICE_FLOOR..=PRICE_CEILING).contains(&p));
            assert_relative_eq!(total[row].unwrap(), p * a, max_relative = 1e-12);
            let year = table.column("year_built").unwrap().number(row).unwrap();
            assert!((1850.0..2025.0).contains(&year));
        }
        let districts = table.column("district").unwrap();
        assert!((0..table.height()).all(|row| DISTRICTS.contains(&&*districts.text(row).unwrap())));
    }
}
