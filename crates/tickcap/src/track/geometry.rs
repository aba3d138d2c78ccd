use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f64) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_zero(self) -> bool {
        self == Vec3::ZERO
    }

    pub fn lerp(self, to: Vec3, delta: f64) -> Vec3 {
        Vec3::new(
            lerp_f64(self.x, to.x, delta),
            lerp_f64(self.y, to.y, delta),
            lerp_f64(self.z, to.z, delta),
        )
    }
}

pub(crate) fn lerp_f64(start: f64, end: f64, delta: f64) -> f64 {
    start + (end - start) * delta
}

pub(crate) fn lerp_f32(start: f32, end: f32, delta: f32) -> f32 {
    start + (end - start) * delta
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn floor_of(position: Vec3) -> Self {
        Self::new(
            position.x.floor() as i32,
            position.y.floor() as i32,
            position.z.floor() as i32,
        )
    }

    pub fn offset(self, facing: Facing) -> Self {
        let (dx, dy, dz) = facing.unit();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.x as f64, self.y as f64, self.z as f64)
    }

    pub fn center(self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Down,
    Up,
    North,
    South,
    West,
    East,
}

impl Facing {
    pub fn unit(self) -> (i32, i32, i32) {
        match self {
            Facing::Down => (0, -1, 0),
            Facing::Up => (0, 1, 0),
            Facing::North => (0, 0, -1),
            Facing::South => (0, 0, 1),
            Facing::West => (-1, 0, 0),
            Facing::East => (1, 0, 0),
        }
    }

    pub fn opposite(self) -> Facing {
        match self {
            Facing::Down => Facing::Up,
            Facing::Up => Facing::Down,
            Facing::North => Facing::South,
            Facing::South => Facing::North,
            Facing::West => Facing::East,
            Facing::East => Facing::West,
        }
    }

    pub fn scaled(self, distance: f64) -> Vec3 {
        let (dx, dy, dz) = self.unit();
        Vec3::new(
            dx as f64 * distance,
            dy as f64 * distance,
            dz as f64 * distance,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    min: Vec3,
    max: Vec3,
}

impl Region {
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn from_corners(a: GridPos, b: GridPos) -> Self {
        Self {
            min: Vec3::new(
                f64::from(a.x.min(b.x)),
                f64::from(a.y.min(b.y)),
                f64::from(a.z.min(b.z)),
            ),
            max: Vec3::new(
                f64::from(a.x.max(b.x)) + 1.0,
                f64::from(a.y.max(b.y)) + 1.0,
                f64::from(a.z.max(b.z)) + 1.0,
            ),
        }
    }

    pub fn min(&self) -> Vec3 {
        self.min
    }

    pub fn max(&self) -> Vec3 {
        self.max
    }

    pub fn center(&self) -> Vec3 {
        self.min.add(self.max).scale(0.5)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.y >= self.min.y
            && point.y < self.max.y
            && point.z >= self.min.z
            && point.z < self.max.z
    }

    pub fn contains_cell(&self, pos: GridPos) -> bool {
        self.contains(pos.center())
    }

    pub fn expand(&self, buffer: f64) -> Region {
        Region {
            min: self.min.sub(Vec3::new(buffer, buffer, buffer)),
            max: self.max.add(Vec3::new(buffer, buffer, buffer)),
        }
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn cells(&self) -> impl Iterator<Item = GridPos> {
        let min = GridPos::floor_of(self.min);
        let last = GridPos::new(
            (self.max.x.ceil() - 1.0) as i32,
            (self.max.y.ceil() - 1.0) as i32,
            (self.max.z.ceil() - 1.0) as i32,
        );
        (min.y..=last.y).flat_map(move |y| {
            (min.z..=last.z)
                .flat_map(move |z| (min.x..=last.x).map(move |x| GridPos::new(x, y, z)))
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cells().count()
    }
}
